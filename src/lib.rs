//! Client library for the XMLMC business-process API and its file storage channel.
//!
//! A typical call sequence buffers parameters, invokes a `(service, method)`
//! pair and reads typed values from the cached response:
//!
//! ```no_run
//! # async fn demo() -> espapi::Result<()> {
//! use espapi::{XmlmcConfig, XmlmcService};
//!
//! let mut service = XmlmcService::new(XmlmcConfig::new("MyInstance"))?;
//! service.logon("admin", "secret").await?;
//!
//! service.clear_params();
//! service.invoke("session", "getSessionInfo").await?;
//! let guest = service.get_response_param_as_bool("isGuestSession")?;
//! # let _ = guest;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod config;
pub mod dav;
pub mod error;
pub mod instance;
pub mod param;
pub mod response;
pub mod service;
pub mod xml;

pub use config::XmlmcConfig;
pub use error::{Result, XmlmcError};
pub use instance::resolve_instance_name;
pub use param::{ParamValue, XmlmcEncoding, XmlmcParam};
pub use response::XmlmcResponse;
pub use service::XmlmcService;
pub use xml::{XmlDocument, XmlElement, XmlNode};
