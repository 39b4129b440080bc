//! Core types shared by the dianping coordination layer.
//!
//! Everything here is storage agnostic: the data model owned by the system of
//! record, the uniform response envelope handed back to calling endpoints,
//! the explicit per-request context, and the key naming used in the shared
//! KV substrate.

pub mod clock;
pub mod context;
pub mod keys;
pub mod model;
pub mod response;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::RequestContext;
pub use model::{SeckillVoucher, Shop, VoucherOrder};
pub use response::ApiResponse;
