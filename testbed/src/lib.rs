/**
The testbed drives a small spray rig through an experiment. A transmitter
builds a program of timed commands (open sprays, wait, set the fan speed),
encodes it in the controller's line protocol and writes it to the
controller's serial port. A receiver samples one or more measurement devices
at a fixed rate while it listens, on a TCP port, for the signal that the
experiment is over.

The crate follows the same layout as the rest of the control software:
devices are atomic units, components group devices into something that
performs a job, and messages define what goes over the wire.
*/

/// Components in the system are created by grouping together
/// devices into a logical unit that performs some function
/// for an experiment.
pub mod components;
/// Devices that are an atomic unit, and can be composed
/// with other devices into components to perform some function.
pub mod devices;
/// Error taxonomy shared by every module.
pub mod error;
/// Message structure for communication into and out of the
/// testbed: the controller program and the experiment signals.
pub mod messages;
/// Configuration, logging and test utilities.
pub mod utils;
