pub mod audio;
pub mod config;
pub mod controller;
pub mod http;
pub mod session;
pub mod storage;

pub use audio::{CaptureDevice, DeviceError, DeviceFactory, DeviceHandle, DeviceStep, EncodingProfile};
pub use config::Config;
pub use controller::{ControllerError, SessionController};
pub use http::{create_router, AppState};
pub use session::{
    EventSink, LifecycleEvent, MemorySink, SessionConfig, SessionError, SessionState,
    SessionStateMachine, SessionStatus, StopReport,
};
pub use storage::OutputPathAllocator;
