use fleetsim_engine::Fleet;
use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

/// The live fleet. Ticks take the lock for the whole pass; readers clone
/// what they need and release it.
pub type SharedFleet = Shared<Fleet>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
