//! Named partitions of the persisted application state.
//!
//! The closed set of partition names and their sensitivity classification
//! live here, validated at the serialization boundary. Partition names not
//! in this set pass through the adapter untouched (forward tolerance for
//! state written by newer application versions).

/// A recognized partition of the persisted state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Patient records. Sensitive.
    Patients,
    /// Clinical assessments. Sensitive.
    Assessments,
    /// Vital sign histories. Sensitive.
    Vitals,
    /// UI preferences (theme, layout). Not sensitive.
    UiPrefs,
    /// Application settings. Not sensitive.
    Settings,
}

impl Partition {
    /// All recognized partitions.
    pub const ALL: &'static [Partition] = &[
        Partition::Patients,
        Partition::Assessments,
        Partition::Vitals,
        Partition::UiPrefs,
        Partition::Settings,
    ];

    /// The partition name as it appears in the persisted payload map.
    pub fn name(&self) -> &'static str {
        match self {
            Partition::Patients => "patients",
            Partition::Assessments => "assessments",
            Partition::Vitals => "vitals",
            Partition::UiPrefs => "uiPrefs",
            Partition::Settings => "settings",
        }
    }

    /// Look up a partition by its persisted name.
    pub fn from_name(name: &str) -> Option<Partition> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    /// Whether this partition holds protected clinical data and must be
    /// routed through the crypto envelope when encryption is active.
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self,
            Partition::Patients | Partition::Assessments | Partition::Vitals
        )
    }

    /// Whether a payload key names a sensitive partition. Unknown names are
    /// treated as not sensitive and pass through unchanged.
    pub fn name_is_sensitive(name: &str) -> bool {
        Self::from_name(name).is_some_and(|p| p.is_sensitive())
    }
}
