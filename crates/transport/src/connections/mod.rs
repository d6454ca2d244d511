//! Connection backends, selected by feature flag. `WebrtcConnection` talks
//! to real peers, `DummyConnection` wires two in-process ends together for
//! tests.

#[cfg(feature = "dummy")]
mod dummy;
#[cfg(feature = "native-webrtc")]
mod native_webrtc;

#[cfg(feature = "dummy")]
pub use crate::connections::dummy::DummyConnection;
#[cfg(feature = "dummy")]
pub use crate::connections::dummy::DummyTransport;
#[cfg(feature = "native-webrtc")]
pub use crate::connections::native_webrtc::WebrtcConnection;
#[cfg(feature = "native-webrtc")]
pub use crate::connections::native_webrtc::WebrtcTransport;
