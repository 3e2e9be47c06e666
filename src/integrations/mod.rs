//! External service integrations and storage backends.

pub mod backend_client {
    pub use crate::backend_client::*;
}

pub mod wizard_store {
    pub use crate::wizard_store::*;
}
