//! A CozyLife device: a transport session plus what the device told us about
//! itself.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::capability::classify::classify;
use crate::capability::classify::ClassificationPolicy;
use crate::capability::classify::DeviceKind;
use crate::capability::light::turn_off_attributes;
use crate::capability::light::LightCommand;
use crate::capability::light::LightFeatures;
use crate::capability::switch;
use crate::protocol::AttributeMap;
use crate::protocol::Dpid;
use crate::protocol::Request;
use crate::protocol::TypeCode;
use crate::protocol::DEFAULT_PORT;
use crate::transport::Connector;
use crate::transport::Session;
use crate::transport::TcpConnector;
use crate::transport::TransportError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Last known attribute values of a device.
pub type DeviceState = AttributeMap;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("device rejected request {sn} with result code {code}")]
    Rejected { sn: String, code: i64 },

    #[error("response is missing `{0}`")]
    MissingField(&'static str),

    #[error("malformed `{field}` in response: {source}")]
    Malformed {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("device identity is not known yet")]
    NoIdentity,
}

/// Identity reported by the info/query handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    device_id: String,
    product_id: String,
    type_code: TypeCode,
    dpids: Vec<Dpid>,
    model_name: String,
}

impl DeviceIdentity {
    pub fn new(device_id: String, product_id: String, type_code: TypeCode, dpids: Vec<Dpid>) -> Self {
        // The friendly name only exists in the vendor cloud.
        let model_name = format!("CozyLife Device ({})", product_id);
        Self {
            device_id,
            product_id,
            type_code,
            dpids,
            model_name,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn type_code(&self) -> &TypeCode {
        &self.type_code
    }

    /// Supported attribute ids; empty if the device did not report them.
    pub fn dpids(&self) -> &[Dpid] {
        &self.dpids
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn supports(&self, dpid: Dpid) -> bool {
        self.dpids.contains(&dpid)
    }
}

/// Connection settings for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOptions {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub policy: ClassificationPolicy,
}

impl DeviceOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            policy: ClassificationPolicy::default(),
        }
    }
}

/// One CozyLife device.
///
/// Every operation is a single exchange on the device's session, so calls
/// from different tasks queue up rather than interleave.
pub struct Device<C: Connector = TcpConnector> {
    session: Session<C>,
    timeout: Duration,
    policy: ClassificationPolicy,
    identity: ArcSwapOption<DeviceIdentity>,
}

impl Device<TcpConnector> {
    /// Device at `host` on the default port, with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_options(&DeviceOptions::new(host))
    }

    pub fn with_options(options: &DeviceOptions) -> Self {
        let connector = TcpConnector::new(&options.host, options.port);
        Self::with_connector(connector, options.timeout).with_policy(options.policy)
    }
}

impl<C: Connector> Device<C> {
    pub fn with_connector(connector: C, timeout: Duration) -> Self {
        Self {
            session: Session::new(connector),
            timeout,
            policy: ClassificationPolicy::default(),
            identity: ArcSwapOption::empty(),
        }
    }

    pub fn with_policy(mut self, policy: ClassificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn address(&self) -> &str {
        self.session.peer()
    }

    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    pub fn identity(&self) -> Option<Arc<DeviceIdentity>> {
        self.identity.load_full()
    }

    /// Light or switch, once the identity is known.
    pub fn kind(&self) -> Option<DeviceKind> {
        self.identity()
            .map(|id| classify(id.dpids(), id.type_code(), &self.policy))
    }

    /// Send a request and return the `msg` object of a successful reply.
    async fn request(&self, request: Request) -> Result<Map<String, Value>, Error> {
        let response = self.session.send_and_await(request, self.timeout).await?;
        if !response.is_success() {
            return Err(Error::Rejected {
                sn: response.sn,
                code: response.result,
            });
        }
        response.msg.ok_or(Error::MissingField("msg"))
    }

    /// Run the info/query handshake and replace the stored identity.
    ///
    /// A failed query still yields an identity, with no supported attribute
    /// ids; the basic identity is usable on its own.
    pub async fn try_refresh_identity(&self) -> Result<Arc<DeviceIdentity>, Error> {
        let info = self.request(Request::Info).await?;
        let device_id = string_field(&info, "did")?;
        let product_id = string_field(&info, "pid")?;
        let type_code = TypeCode::parse(&string_field(&info, "dtp")?);

        let dpids = match self.request(Request::Query).await.and_then(|msg| dpid_list(&msg)) {
            Ok(dpids) => dpids,
            Err(e) => {
                warn!("Failed to query DPID list from {}: {}", self.address(), e);
                Vec::new()
            }
        };

        let identity = Arc::new(DeviceIdentity::new(device_id, product_id, type_code, dpids));
        info!(
            "Device query successful - {}: DID={}, PID={}, Type={}, DPIDs={:?}",
            self.address(),
            identity.device_id(),
            identity.product_id(),
            identity.type_code(),
            identity.dpids()
        );
        self.identity.store(Some(identity.clone()));
        Ok(identity)
    }

    pub async fn refresh_identity(&self) -> bool {
        match self.try_refresh_identity().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Device info query failed for {}: {}", self.address(), e);
                false
            }
        }
    }

    /// Current attribute values.
    pub async fn try_query_state(&self) -> Result<DeviceState, Error> {
        let msg = self.request(Request::Query).await?;
        let data = msg.get("data").ok_or(Error::MissingField("data"))?;
        serde_json::from_value(data.clone()).map_err(|source| Error::Malformed {
            field: "data",
            source,
        })
    }

    pub async fn query_state(&self) -> Option<DeviceState> {
        self.try_query_state()
            .await
            .inspect_err(|e| debug!("State query failed for {}: {}", self.address(), e))
            .ok()
    }

    /// Write attribute values. Success only means the device acknowledged the
    /// request; query again to see what it actually applied.
    pub async fn try_set_state(&self, attributes: AttributeMap) -> Result<(), Error> {
        let msg = self.request(Request::Set(attributes)).await?;
        if !msg.contains_key("data") {
            return Err(Error::MissingField("data"));
        }
        Ok(())
    }

    pub async fn set_state(&self, attributes: AttributeMap) -> bool {
        match self.try_set_state(attributes).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Set failed for {}: {}", self.address(), e);
                false
            }
        }
    }

    /// Switch one gang of a multi-way switch.
    ///
    /// `state` supplies the current bitmask and is updated when the device
    /// accepts the change. Nothing is sent if the gang is already in the
    /// requested position.
    pub async fn set_gang(&self, state: &mut DeviceState, gang: u8, on: bool) -> bool {
        let current = switch::bitmask(state);
        let Some(next) = switch::gang_update(current, gang, on) else {
            debug!(
                "Gang {} on {} is already {}",
                gang,
                self.address(),
                if on { "on" } else { "off" }
            );
            return true;
        };

        let attrs = AttributeMap::from([(switch::BITMASK, Value::from(next))]);
        if !self.set_state(attrs).await {
            return false;
        }
        state.insert(switch::BITMASK, Value::from(next));
        true
    }

    /// Features of the light, from the supported attribute ids.
    pub fn light_features(&self) -> Result<LightFeatures, Error> {
        let identity = self.identity().ok_or(Error::NoIdentity)?;
        Ok(LightFeatures::from_dpids(identity.dpids()))
    }

    pub async fn turn_on_light(&self, command: &LightCommand) -> bool {
        match self.light_features() {
            Ok(features) => self.set_state(command.to_attributes(&features)).await,
            Err(e) => {
                warn!("Cannot drive light at {}: {}", self.address(), e);
                false
            }
        }
    }

    pub async fn turn_off_light(&self) -> bool {
        self.set_state(turn_off_attributes()).await
    }
}

/// String field of an info response. Numbers are accepted as well.
fn string_field(msg: &Map<String, Value>, field: &'static str) -> Result<String, Error> {
    match msg.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(Error::MissingField(field)),
    }
}

fn dpid_list(msg: &Map<String, Value>) -> Result<Vec<Dpid>, Error> {
    let attr = msg.get("attr").ok_or(Error::MissingField("attr"))?;
    serde_json::from_value(attr.clone()).map_err(|source| Error::Malformed {
        field: "attr",
        source,
    })
}
