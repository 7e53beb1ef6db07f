//! LCM event publishing

mod event;
mod notifier;

pub use event::{CmHandleValues, LcmEvent, LcmEventBody, LcmEventType, LockReasonValues};
pub use notifier::EventNotifier;
