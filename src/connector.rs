//! Connector contract and built-in implementations.
//!
//! South connectors acquire data (polled by the scan scheduler or pushing
//! on their own), North connectors deliver it. Both sides plug into the
//! engine through the traits in [`traits`]; [`factory`] builds instances
//! from configuration.

pub mod factory;
pub mod north_console;
pub mod north_file_writer;
pub mod north_http;
pub mod south_folder_scanner;
pub mod south_simulator;
pub mod traits;

pub use factory::ConnectorFactory;
pub use north_console::ConsoleNorth;
pub use north_file_writer::FileWriterNorth;
pub use north_http::HttpNorth;
pub use south_folder_scanner::FolderScannerSouth;
pub use south_simulator::SimulatorSouth;
pub use traits::{
    ConnectionState, DataSink, NorthConnector, NorthHandle, SouthConnector, SouthHandle,
};
