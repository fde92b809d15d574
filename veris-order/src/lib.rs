pub mod locking;
pub mod models;
pub mod payment;
pub mod reconcile;
pub mod refund;
pub mod repository;

pub use locking::LockPolicy;
pub use models::{
    ClientContext, CreateOrderRequest, CreateRefundRequest, PaymentOrder, PaymentStatus,
    RefundOrder, RefundStatus,
};
pub use payment::{CallbackAck, InitiateOutcome, PaymentConfig, PaymentError, PaymentOrchestrator};
pub use reconcile::{ReconcileConfig, ReconciliationScheduler, SweepReport};
pub use refund::{RefundConfig, RefundError, RefundOrchestrator};
pub use repository::{PaymentOrderRepository, RefundOrderRepository};
