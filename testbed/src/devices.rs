/// Devices are the atomic units that can be combined together
/// into components. Their core responsibilities do not change
/// based on location, name etc.
pub mod hardware {
    /// Serial devices: the spray controller and measurement sources.
    pub mod serial;
    /// In-memory device used by the unit tests.
    #[cfg(test)]
    pub mod mock;
}

/// Devices that live in software rather than on the rig.
pub mod software {
    /// Listener that marks the end of an experiment.
    pub mod termination;
}
