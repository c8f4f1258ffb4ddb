/// Well-known JDK types the singleton checks compare against by identity.
#[derive(Debug)]
pub(crate) struct CapabilityMarkers {
    pub(crate) cloneable: &'static str,
    pub(crate) serializable: &'static str,
    /// Exception a compliant `clone` override is expected to throw.
    pub(crate) clone_not_supported: &'static str,
}

impl CapabilityMarkers {
    pub(crate) fn clone_not_supported_descriptor(&self) -> String {
        format!("L{};", self.clone_not_supported)
    }
}

pub(crate) static CAPABILITY_MARKERS: CapabilityMarkers = CapabilityMarkers {
    cloneable: "java/lang/Cloneable",
    serializable: "java/io/Serializable",
    clone_not_supported: "java/lang/CloneNotSupportedException",
};
