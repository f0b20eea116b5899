pub use argentum_infra::{
    arc::{Arc, ArcList},
    impl_intrusive_adapter,
    intrusive::Adapter,
    list::{List, ListNode},
};

/// Scheduling priority. Smaller values run first.
pub type Priority = u8;
