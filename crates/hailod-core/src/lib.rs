//! Core of the Hailo device manager.
//!
//! The Hailo-10H exposes a single exclusive device context; this crate holds
//! everything needed to put that context behind one coordinator process: the
//! length-prefixed JSON wire protocol, the tensor payload schema, the resident
//! model registry, the device adapter seam with its HailoRT backend, the
//! single-writer executor, and the environment configuration. The server
//! crate wires these into a daemon; the client crate reuses the protocol
//! types.

pub mod backend;
pub mod config;
pub mod device;
pub mod executor;
pub mod protocol;
pub mod registry;
pub mod tensor;

pub use backend::HailortAdapter;
pub use config::{Config, HttpBind};
pub use device::{DeviceAdapter, DeviceError, ModelType};
pub use executor::{status_response, Command, DaemonInfo, ExecutorHandle, WorkItem};
pub use protocol::{read_frame, write_frame, FrameError, Request, Response};
pub use registry::{LoadedModel, ModelKey};
pub use tensor::{Tensor, TensorPayload};
