pub mod event_sub;
pub mod unblock_signal;

pub use event_sub::EventSub;
pub use unblock_signal::UnblockSignal;
