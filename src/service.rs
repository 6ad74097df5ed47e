use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use tracing::{debug, info, warn};
use url::Url;

use crate::common::{build_user_agent, join_url};
use crate::config::XmlmcConfig;
use crate::error::{Result, XmlmcError};
use crate::instance::resolve_with_template;
use crate::param::{params_to_xml, ParamValue, XmlmcEncoding, XmlmcParam};
use crate::response::XmlmcResponse;
use crate::xml::{write_event, XmlDocument};

pub const SESSION_COOKIE: &str = "ESPSessionState";
pub const XMLMC_CONTENT_TYPE: &str = "text/xmlmc; charset=utf-8";

const SESSION_SERVICE: &str = "session";
const LOGON_METHODS: &[&str] = &["userLogon", "guestLogon"];
const LOGOFF_METHOD: &str = "userLogoff";

/// Client for one XMLMC instance.
///
/// Holds the buffered request parameters, the session and the most recent
/// response. One instance is meant to be driven by one task at a time; calls
/// take `&mut self`, so sharing across tasks needs an outer lock.
pub struct XmlmcService {
    client: Client,
    config: XmlmcConfig,
    server_url: Url,
    session_id: Option<String>,
    params: Vec<XmlmcParam>,
    last_response: Option<XmlmcResponse>,
    last_error: Option<String>,
}

impl XmlmcService {
    /// Creates a client; resolves the instance name but performs no network I/O.
    pub fn new(config: XmlmcConfig) -> Result<Self> {
        config.validate()?;

        let server_url = resolve_with_template(&config.instance, &config.instance_url_template)?;

        let client = Client::builder().timeout(config.timeout()).build()?;

        info!("XMLMC client for {} (api key: {})", server_url, config.api_key.is_some());

        Ok(Self {
            client,
            config,
            server_url,
            session_id: None,
            params: Vec::new(),
            last_response: None,
            last_error: None,
        })
    }

    /// Creates a client from an instance name or URL, endpoint paths and an optional API key.
    pub fn with_instance(instance: &str, xmlmc_path: &str, dav_path: &str, api_key: &str) -> Result<Self> {
        Self::new(
            XmlmcConfig::new(instance)
                .with_endpoints(xmlmc_path, dav_path)
                .with_api_key(api_key),
        )
    }

    // ============================================================================
    // Connection and Session
    // ============================================================================

    /// The resolved server URL, unchanged when a full URL was configured
    pub fn server_url(&self) -> &str {
        self.server_url.as_str()
    }

    pub fn config(&self) -> &XmlmcConfig {
        &self.config
    }

    /// Resolves a name the same way the constructor does, without side effects.
    pub fn resolve_instance_name(&self, name: &str) -> Result<Url> {
        resolve_with_template(name, &self.config.instance_url_template)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Reuses a session obtained elsewhere.
    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
    }

    pub fn clear_session(&mut self) {
        self.session_id = None;
    }

    /// Logs on with `session::userLogon` and returns the new session id.
    ///
    /// The password is base64 encoded on the wire. The parameter buffer is
    /// cleared before and after the call. Any previous session is dropped
    /// first, so a reply without a session id is an error.
    pub async fn logon(&mut self, user_id: &str, password: &str) -> Result<String> {
        self.session_id = None;
        self.clear_params();
        self.add_param("userId", user_id);
        self.add_param("password", password)
            .encode_value(XmlmcEncoding::Base64);

        let result = self.invoke(SESSION_SERVICE, "userLogon").await.map(|_| ());
        self.clear_params();
        result?;

        self.session_id
            .clone()
            .ok_or_else(|| XmlmcError::ParamNotFound("sessionId".to_string()))
    }

    pub async fn logoff(&mut self) -> Result<()> {
        self.clear_params();
        self.invoke(SESSION_SERVICE, LOGOFF_METHOD).await?;
        self.session_id = None;
        Ok(())
    }

    // ============================================================================
    // Parameter Buffer
    // ============================================================================

    /// Buffers `<key>value</key>` and returns the new parameter for chaining.
    pub fn add_param(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> &mut XmlmcParam {
        self.push_param(XmlmcParam::new(key, value))
    }

    /// Buffers an empty complex parameter and returns it so children can be added.
    pub fn add_complex_param(&mut self, key: impl Into<String>) -> &mut XmlmcParam {
        self.push_param(XmlmcParam::complex(key))
    }

    /// Buffers one sibling `<key>` per value.
    pub fn add_param_list<I, V>(&mut self, key: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        for value in values {
            self.params.push(XmlmcParam::new(key, value));
        }
    }

    pub fn push_param(&mut self, param: XmlmcParam) -> &mut XmlmcParam {
        self.params.push(param);
        let last = self.params.len() - 1;
        &mut self.params[last]
    }

    pub fn params(&self) -> &[XmlmcParam] {
        &self.params
    }

    pub fn clear_params(&mut self) {
        self.params.clear();
    }

    /// The buffered parameters serialized as sibling elements.
    pub fn params_xml(&self) -> Result<String> {
        params_to_xml(&self.params)
    }

    /// The full request envelope `invoke` would send.
    pub fn invoke_xml(&self, service: &str, method: &str) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        let start = BytesStart::new("methodCall").with_attributes([("service", service), ("method", method)]);
        write_event(&mut writer, Event::Start(start))?;
        if !self.params.is_empty() {
            write_event(&mut writer, Event::Start(BytesStart::new("params")))?;
            for param in &self.params {
                param.write_to(&mut writer)?;
            }
            write_event(&mut writer, Event::End(BytesEnd::new("params")))?;
        }
        write_event(&mut writer, Event::End(BytesEnd::new("methodCall")))?;
        String::from_utf8(writer.into_inner()).map_err(XmlmcError::parse)
    }

    // ============================================================================
    // Invocation
    // ============================================================================

    pub fn invoke_url(&self, service: &str, method: &str) -> Result<Url> {
        // The trailing slash after the service name is required by the server
        let base = join_url(self.server_url.as_str(), &[&self.config.xmlmc_path, service]);
        let mut url = Url::parse(&format!("{}/", base))?;
        url.query_pairs_mut().append_pair("method", method);
        Ok(url)
    }

    /// Sends the buffered parameters as `service::method` and caches the response.
    ///
    /// Buffered parameters are left in place. On `status="fail"` the server's
    /// message is returned in [`XmlmcError::RequestFailure`] and kept for
    /// [`XmlmcService::last_error_message`].
    pub async fn invoke(&mut self, service: &str, method: &str) -> Result<&XmlmcResponse> {
        self.last_response = None;
        self.last_error = None;

        if self.config.api_key.is_none() && self.session_id.is_none() && !is_logon(service, method) {
            let err = XmlmcError::NotAuthenticated {
                service: service.to_string(),
                method: method.to_string(),
            };
            self.last_error = Some(err.to_string());
            return Err(err);
        }

        let body = self.invoke_xml(service, method)?;
        let url = self.invoke_url(service, method)?;

        debug!("📤 XMLMC {}::{} -> {}", service, method, url);
        debug!("   Body length: {} bytes, {} top-level params", body.len(), self.params.len());

        let request = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, XMLMC_CONTENT_TYPE)
            .header(ACCEPT, "text/xmlmc")
            .body(body);

        let response = match self.authorize(request).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("❌ XMLMC {}::{} transport failure: {}", service, method, e);
                self.last_error = Some(e.to_string());
                return Err(XmlmcError::Transport(e));
            }
        };

        let status = response.status();
        let cookie_session = session_from_cookies(&response);
        debug!("📥 XMLMC response: {}", status);

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                self.last_error = Some(e.to_string());
                return Err(XmlmcError::Transport(e));
            }
        };

        let parsed = match XmlmcResponse::parse(text.as_str()) {
            Ok(parsed) => parsed,
            Err(parse_error) => {
                let err = if status.is_success() {
                    parse_error
                } else {
                    XmlmcError::Http {
                        status,
                        url: url.to_string(),
                        body: text,
                    }
                };
                warn!("❌ XMLMC {}::{} unreadable response: {}", service, method, err);
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        if !parsed.is_success() {
            let message = parsed.error_message().unwrap_or_default().to_string();
            warn!("XMLMC {}::{} failed: {}", service, method, message);
            self.last_error = Some(message.clone());
            self.last_response = Some(parsed);
            return Err(XmlmcError::RequestFailure {
                service: service.to_string(),
                method: method.to_string(),
                message,
            });
        }

        if service == SESSION_SERVICE {
            if is_logon(service, method) {
                let session = parsed.param_as_string("sessionId").ok().or(cookie_session);
                if let Some(id) = session {
                    info!("✅ Logged on, session {}", redact(&id));
                    self.session_id = Some(id);
                }
            } else if method == LOGOFF_METHOD {
                info!("Logged off");
                self.session_id = None;
            }
        }

        let stored: &XmlmcResponse = self.last_response.insert(parsed);
        Ok(stored)
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Adds User-Agent and whichever credential is available.
    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request.header(USER_AGENT, build_user_agent());
        if let Some(key) = &self.config.api_key {
            request = request.header(AUTHORIZATION, format!("ESP-APIKEY {}", key));
        }
        if let Some(session) = &self.session_id {
            request = request.header(COOKIE, format!("{}={}", SESSION_COOKIE, session));
        }
        request
    }

    // ============================================================================
    // Response Access
    // ============================================================================

    pub fn response(&self) -> Result<&XmlmcResponse> {
        self.last_response.as_ref().ok_or(XmlmcError::NoResponse)
    }

    /// Raw XML of the most recent response
    pub fn response_xml(&self) -> Result<&str> {
        Ok(self.response()?.xml())
    }

    pub fn response_document(&self) -> Result<&XmlDocument> {
        Ok(self.response()?.document())
    }

    /// Message from the most recent failed call, if it failed
    pub fn last_error_message(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn get_response_param_as_string(&self, key: &str) -> Result<String> {
        self.response()?.param_as_string(key)
    }

    pub fn get_response_param_as_bool(&self, key: &str) -> Result<bool> {
        self.response()?.param_as_bool(key)
    }

    pub fn get_response_param_as_long(&self, key: &str) -> Result<i64> {
        self.response()?.param_as_long(key)
    }

    pub fn get_response_param_as_double(&self, key: &str) -> Result<f64> {
        self.response()?.param_as_double(key)
    }

    pub fn get_response_param_as_time(&self, key: &str) -> Result<DateTime<Utc>> {
        self.response()?.param_as_date(key)
    }

    pub fn get_response_param_count(&self, key: &str) -> Result<usize> {
        Ok(self.response()?.param_count(key))
    }

    pub fn get_response_param_as_string_array(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.response()?.param_as_string_array(key))
    }

    pub fn get_response_param_as_complex_type(&self, key: &str, occurrence: usize) -> Result<XmlDocument> {
        Ok(self.response()?.param_as_complex_type(key, occurrence))
    }
}

fn is_logon(service: &str, method: &str) -> bool {
    service == SESSION_SERVICE && LOGON_METHODS.contains(&method)
}

fn session_from_cookies(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.trim() == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn redact(session_id: &str) -> String {
    let prefix: String = session_id.chars().take(6).collect();
    format!("{}…", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> XmlmcService {
        XmlmcService::with_instance("http://localhost/sw/", "xmlmc", "dav", "")
            .expect("Failed to create XMLMC service")
    }

    #[test]
    fn test_server_url_is_resolved() {
        assert_eq!(service().server_url(), "http://localhost/sw/");

        let named = XmlmcService::with_instance("MyInstance", "xmlmc", "dav", "").unwrap();
        assert_ne!(named.server_url(), "MyInstance");
        assert!(named.server_url().contains("MyInstance"));
    }

    #[test]
    fn test_add_param_variants() {
        let mut service = service();

        service.add_param("key", "string");
        assert_eq!(service.params_xml().unwrap(), "<key>string</key>");
        service.clear_params();

        service.add_param("key", false);
        assert_eq!(service.params_xml().unwrap(), "<key>false</key>");
        service.clear_params();

        service.add_param("key", 12345_i64);
        assert_eq!(service.params_xml().unwrap(), "<key>12345</key>");
        service.clear_params();

        service.add_param("key", 0.12345_f32);
        assert_eq!(service.params_xml().unwrap(), "<key>0.12345</key>");
        service.clear_params();

        let now = Utc::now();
        service.add_param("key", now);
        assert_eq!(
            service.params_xml().unwrap(),
            format!("<key>{}</key>", now.format("%Y-%m-%d %H:%M:%SZ"))
        );
        service.clear_params();

        service.add_param("key", XmlmcParam::new("child", "string"));
        assert_eq!(service.params_xml().unwrap(), "<key><child>string</child></key>");
        service.clear_params();

        service.add_param_list("key", ["string1", "string2", "string3"]);
        assert_eq!(
            service.params_xml().unwrap(),
            "<key>string1</key><key>string2</key><key>string3</key>"
        );
        service.clear_params();
        assert!(service.params().is_empty());
    }

    #[test]
    fn test_invoke_xml_envelope() {
        let mut service = service();
        service.add_param("severityLevel", "all");
        let group = service.add_complex_param("logMessageGroup");
        group.add("general", "true");
        group.add("sql", "true");

        assert_eq!(
            service.invoke_xml("session", "setDiagnosticsLevel").unwrap(),
            "<methodCall service=\"session\" method=\"setDiagnosticsLevel\"><params>\
             <severityLevel>all</severityLevel>\
             <logMessageGroup><general>true</general><sql>true</sql></logMessageGroup>\
             </params></methodCall>"
        );
    }

    #[test]
    fn test_invoke_xml_without_params() {
        assert_eq!(
            service().invoke_xml("session", "getSessionInfo").unwrap(),
            "<methodCall service=\"session\" method=\"getSessionInfo\"></methodCall>"
        );
    }

    #[test]
    fn test_invoke_url_has_trailing_slash_after_service() {
        let url = service().invoke_url("mail", "checkServiceAvailability").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost/sw/xmlmc/mail/?method=checkServiceAvailability"
        );
    }

    #[test]
    fn test_readers_need_a_response() {
        let service = service();
        assert!(matches!(service.response_xml(), Err(XmlmcError::NoResponse)));
        assert!(matches!(
            service.get_response_param_as_string("sessionId"),
            Err(XmlmcError::NoResponse)
        ));
        assert_eq!(service.last_error_message(), None);
    }

    #[tokio::test]
    async fn test_invoke_without_credentials_is_rejected_before_sending() {
        let mut service = service();
        let err = service.invoke("session", "getSessionInfo").await.unwrap_err();
        assert!(matches!(err, XmlmcError::NotAuthenticated { .. }));
        assert!(service.last_error_message().is_some());
    }

    #[test]
    fn test_session_management() {
        let mut service = service();
        assert_eq!(service.session_id(), None);
        service.set_session_id("abcdef123456");
        assert_eq!(service.session_id(), Some("abcdef123456"));
        service.clear_session();
        assert_eq!(service.session_id(), None);
    }

    #[test]
    fn test_redact_truncates() {
        assert_eq!(redact("abcdef123456"), "abcdef…");
        assert_eq!(redact("abc"), "abc…");
    }
}
