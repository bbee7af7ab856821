//! Model components: the VP-SDE noise schedule, the conditional score
//! network, and the tensor bridge to host-side design batches.

pub mod bridge;
pub mod score_net;
pub mod sde;
