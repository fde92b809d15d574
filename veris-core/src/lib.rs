pub mod channel;
pub mod lock;
pub mod store;

pub use channel::{
    CallbackInfo, CallbackKind, CallbackOutcome, CancelOutcome, ChannelAdapter, ChannelError,
    ChannelOrder, ChannelPaymentStatus, ChannelReference, ChannelRefundStatus, InitiateResult,
    PaymentMethod, RefundResult,
};
pub use lock::{LockError, LockService, LockToken};
pub use store::StoreError;
