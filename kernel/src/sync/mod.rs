pub mod mailbox;
pub mod mutex;
pub mod semaphore;
pub mod spinlock;

pub use mailbox::Mailbox;
pub use mutex::Mutex;
pub use semaphore::Semaphore;
pub use spinlock::{RawSpinLock, SpinLock, SpinLockGuard};
