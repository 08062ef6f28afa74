//! The two I/O workers.
//!
//! Both workers run for the lifetime of the client, and are oblivious to reconnections:
//! every iteration, they fetch the current channel from the [`Link`], idle if there
//! is none, and invalidate it if it fails them. They never close a channel, that is
//! left to the [`Supervisor`](crate::Supervisor).

use crate::{Clock, SystemClock, link::Link};

pub mod inbound;
pub mod outbound;

pub use inbound::{Inbound, InboundEvent, MessageHandler};
pub use outbound::{Outbound, OutboundEvent};

// sleeps for `duration` or until shutdown
#[inline(always)]
fn idle<S>(link: &Link<S>, duration: core::time::Duration) {
    SystemClock.sleep(duration, link.shutdown());
}
