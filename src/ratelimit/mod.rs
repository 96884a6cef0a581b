//! Rate limiting logic and state management.

mod auth;
mod backend;
mod behaviour;
mod clock;
mod identity;
mod limiter;
mod registry;
mod store;
mod window;

pub use auth::{basic_authorization, AuthStatus};
pub use backend::AdmissionControl;
pub use behaviour::{Behaviour, DEFAULT_REQUEST_LIMIT, DEFAULT_WINDOW_SECONDS};
pub use clock::{dedup_unit, Clock, ManualClock, SystemClock, Timestamp};
pub use identity::{endpoint_key, Identity, IdentityKind};
pub use limiter::{RateLimited, RateLimiter};
pub use registry::Registry;
pub use store::AttemptStore;
pub use window::{Admission, AttemptWindow, Rejection, DEDUP_RETRY_LIMIT};
