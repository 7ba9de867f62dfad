/// Components that run one side of an experiment.
pub mod experiment {
    /// Components that send programs to the spray controller.
    pub mod transmitting {
        /// Encodes a program and writes it to the controller.
        pub mod transmitter;
    }
    /// Components that collect measurements during an experiment.
    pub mod receiving {
        /// Ties the sampler to the end of experiment listener.
        pub mod receiver;
        /// Rate controlled polling of measurement devices.
        pub mod sampler;
    }
}

/// Helpful prelude when working with components.
pub mod prelude {
    pub use crate::components::experiment::receiving::receiver::*;
    pub use crate::components::experiment::receiving::sampler::*;
    pub use crate::components::experiment::transmitting::transmitter::*;
    pub use crate::error::{Result, TestbedError};
    pub use crate::messages::control::command::*;
}
