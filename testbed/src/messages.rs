/// Standardise how programs are sent to the spray controller.
pub mod control {
    /// The commands a controller program is built from.
    pub mod command;
    /// Line protocol the controller reads programs in.
    pub mod codec;
}

/// Markers exchanged around an experiment and the notifier that ends one.
pub mod signal;
