//! The control-component side of the online mix-net.

mod worker;

pub use worker::{NodeMixWorker, MIX_DEC_ONLINE_CONTEXT};
