use serde::{Deserialize, Serialize};

/// Immutable once observed: identity of a single iOS device or simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub udid: String,
    pub name: String,
    pub product: String,
}

impl DeviceIdentity {
    pub fn new(udid: impl Into<String>, name: impl Into<String>, product: impl Into<String>) -> Self {
        Self {
            udid: udid.into(),
            name: name.into(),
            product: product.into(),
        }
    }

    /// Hardware model tag derived from the raw product code. Empty codes
    /// (simulators don't carry a ProductType) map to "Simulator"; unknown
    /// codes map to "Unknown".
    pub fn model(&self) -> &'static str {
        if self.product.is_empty() {
            return "Simulator";
        }
        product_to_model(&self.product)
    }
}

/// `{present: bool, udid: string}`. Emitted by the presence tracker, consumed
/// exactly once by the coordinator. For a given udid, events strictly
/// alternate starting with `present=true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub present: bool,
    pub udid: String,
}

/// Sentinel udid pattern for a known invalid-device artifact: a run of
/// hex-looking `f` characters. Matched the way the coordinator needs it:
/// a long run of `f`s at the start of the string.
pub fn is_sentinel_udid(udid: &str) -> bool {
    const MIN_RUN: usize = 18;
    udid.chars().take(MIN_RUN).all(|c| c == 'f')
}

fn product_to_model(product_type: &str) -> &'static str {
    match product_type {
        "iPhone8,1" => "iPhone 6s",
        "iPhone8,2" => "iPhone 6s Plus",
        "iPhone8,4" => "iPhone SE",
        "iPhone9,1" | "iPhone9,3" => "iPhone 7",
        "iPhone9,2" | "iPhone9,4" => "iPhone 7 Plus",
        "iPhone10,1" | "iPhone10,4" => "iPhone 8",
        "iPhone10,2" | "iPhone10,5" => "iPhone 8 Plus",
        "iPhone10,3" | "iPhone10,6" => "iPhone X",
        "iPhone11,8" => "iPhone XR",
        "iPhone11,2" => "iPhone XS",
        "iPhone11,6" => "iPhone XS Max",
        "iPhone12,1" => "iPhone 11",
        "iPhone12,3" => "iPhone 11 Pro",
        "iPhone12,5" => "iPhone 11 Pro Max",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_product_maps_to_model() {
        let d = DeviceIdentity::new("u1", "n1", "iPhone8,1");
        assert_eq!(d.model(), "iPhone 6s");
    }

    #[test]
    fn unknown_product_is_unknown() {
        let d = DeviceIdentity::new("u1", "n1", "iPhone99,9");
        assert_eq!(d.model(), "Unknown");
    }

    #[test]
    fn empty_product_is_simulator() {
        let d = DeviceIdentity::new("u1", "n1", "");
        assert_eq!(d.model(), "Simulator");
    }

    #[test]
    fn sentinel_udid_is_detected() {
        assert!(is_sentinel_udid("ffffffffffffffffff0000000000000000"));
        assert!(!is_sentinel_udid("00001234-000A1B2C3D4E5F6A"));
    }
}
