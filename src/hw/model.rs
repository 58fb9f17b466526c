use serde::Serialize;

/// Where a device currently lives inside the manager.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Seen in an advertisement but not connected.
    #[default]
    #[display("discovered")]
    Discovered,
    /// Connected and present in the device registry.
    #[display("connected")]
    Connected,
}

/// A BLE peripheral as reported by an adapter.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Device {
    id: String,
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    adapter_name: Option<String>,
    state: ConnectionState,
}

impl Device {
    /// Creates a discovered device record.
    ///
    /// ```
    /// let device = blehub::Device::new("AA:BB", Some("Sensor1".to_string()));
    /// assert_eq!("AA:BB", device.id());
    /// ```
    #[must_use]
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
            adapter_name: None,
            state: ConnectionState::Discovered,
        }
    }

    /// Returns the stable peripheral identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the advertised display name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the name of the adapter that reported this device.
    #[must_use]
    pub fn adapter_name(&self) -> Option<&str> {
        self.adapter_name.as_deref()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn with_adapter_name(mut self, adapter_name: impl Into<String>) -> Self {
        self.adapter_name = Some(adapter_name.into());
        self
    }

    pub(crate) fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }
}

/// A characteristic inside a GATT service.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct GattCharacteristic {
    uuid: String,
    description: Option<String>,
    properties: Vec<String>,
}

impl GattCharacteristic {
    /// Creates a characteristic description.
    #[must_use]
    pub fn new(uuid: impl AsRef<str>, description: Option<String>, properties: Vec<String>) -> Self {
        Self {
            uuid: normalise_uuid(uuid.as_ref()),
            description,
            properties,
        }
    }

    /// Returns the lowercase characteristic UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns the user description (descriptor 0x2901), if the device exposes one.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns property labels such as `read`, `write` or `notify`.
    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    pub(crate) fn has_property(&self, property: &str) -> bool {
        self.properties
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(property))
    }
}

/// A GATT service and its characteristics.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct GattService {
    uuid: String,
    device_id: String,
    characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    /// Creates a service description.
    #[must_use]
    pub fn new(
        uuid: impl AsRef<str>,
        device_id: impl Into<String>,
        characteristics: Vec<GattCharacteristic>,
    ) -> Self {
        Self {
            uuid: normalise_uuid(uuid.as_ref()),
            device_id: device_id.into(),
            characteristics,
        }
    }

    /// Returns the lowercase service UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns the owning device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the characteristics in adapter order.
    #[must_use]
    pub fn characteristics(&self) -> &[GattCharacteristic] {
        &self.characteristics
    }

    pub(crate) fn characteristic(&self, uuid: &str) -> Option<&GattCharacteristic> {
        self.characteristics
            .iter()
            .find(|characteristic| characteristic.uuid().eq_ignore_ascii_case(uuid))
    }
}

/// Identifies one connection of a device on the adapter that owns it.
///
/// A new session is started every time the adapter observes a connection, so
/// handles resolved under an older session can be recognised as stale.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
pub struct SessionId(u64);

impl SessionId {
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

/// A service resolved by an adapter under a specific session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceHandle {
    service: GattService,
    session: SessionId,
}

impl ServiceHandle {
    #[must_use]
    pub fn new(service: GattService, session: SessionId) -> Self {
        Self { service, session }
    }

    #[must_use]
    pub fn service(&self) -> &GattService {
        &self.service
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        self.service.device_id()
    }
}

/// A characteristic resolved by an adapter under a specific session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CharacteristicHandle {
    device_id: String,
    service_uuid: String,
    characteristic: GattCharacteristic,
    session: SessionId,
}

impl CharacteristicHandle {
    #[must_use]
    pub fn new(service: &ServiceHandle, characteristic: GattCharacteristic) -> Self {
        Self {
            device_id: service.device_id().to_string(),
            service_uuid: service.service().uuid().to_string(),
            characteristic,
            session: service.session(),
        }
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn service_uuid(&self) -> &str {
        &self.service_uuid
    }

    #[must_use]
    pub fn characteristic(&self) -> &GattCharacteristic {
        &self.characteristic
    }

    #[must_use]
    pub fn uuid(&self) -> &str {
        self.characteristic.uuid()
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }
}

/// Lowercases a UUID string so cache keys and comparisons are case-insensitive.
pub(crate) fn normalise_uuid(uuid: &str) -> String {
    uuid.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("0000180F-0000-1000-8000-00805F9B34FB", "0000180f-0000-1000-8000-00805f9b34fb")]
    #[case(" svc1 ", "svc1")]
    fn service_uuid_is_normalised(#[case] raw: &str, #[case] expected: &str) {
        let service = GattService::new(raw, "AA:BB", Vec::new());
        assert_eq!(expected, service.uuid());
    }

    #[test]
    fn characteristic_lookup_ignores_case() {
        let service = GattService::new(
            "svc1",
            "AA:BB",
            vec![GattCharacteristic::new("CHAR1", None, vec!["read".into()])],
        );
        let found = service.characteristic("Char1").map(GattCharacteristic::uuid);
        assert_eq!(Some("char1"), found);
    }

    #[test]
    fn characteristic_handle_inherits_service_session() {
        let service = ServiceHandle::new(GattService::new("svc1", "AA:BB", Vec::new()), SessionId::new(7));
        let handle = CharacteristicHandle::new(&service, GattCharacteristic::new("char1", None, Vec::new()));

        assert_eq!(SessionId::new(7), handle.session());
        assert_eq!("svc1", handle.service_uuid());
        assert_eq!("AA:BB", handle.device_id());
    }
}
