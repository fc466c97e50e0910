//! Serving backends.
//!
//! Both engines run the same frozen route table through the same
//! [`Context`](crate::Context); they differ in how connections are accepted
//! and what they can do at the edges:
//!
//! | Engine | HTTP/2 | Force-close on stop | Extended methods |
//! |---|---|---|---|
//! | [`HyperEngine`] | yes | yes | yes |
//! | [`AxumEngine`] | no | no | no |

mod axum;
mod hyper;

pub use self::axum::{AxumEngine, AxumNative};
pub use self::hyper::{HyperEngine, HyperNative};
