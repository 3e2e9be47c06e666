// Domain-layer modules and shared errors
pub mod phone {
    pub use crate::phone::*;
}

pub mod eligibility {
    pub use crate::eligibility::*;
}

pub mod records {
    pub use crate::records::*;
}

pub mod verification {
    pub use crate::verification::*;
}

pub mod debt_check {
    pub use crate::debt_check::*;
}

pub mod wizard {
    pub use crate::wizard::*;
}

pub mod errors {
    pub use crate::errors::*;
}
