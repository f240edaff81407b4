//! The scheduling transaction: authorize, resolve, dispatch, aggregate.

mod accounting;
mod aggregator;
mod error;
mod lock;
mod policy;
mod scheduler;

pub use accounting::{Accounting, AccountingKind};
pub use aggregator::{ResponseAggregator, ScheduleResponse};
pub use error::{SchedulingError, SchedulingResult};
pub use lock::{UidLease, UidLocks};
pub use policy::{
    CalDavPolicy, ISchedulePolicy, ImipPolicy, InboundRequest, Party, PolicyInput, RequestOrigin,
    SchedulingPolicy,
};
pub use scheduler::{ScheduleRequest, Scheduler, Step};
