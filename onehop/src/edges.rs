use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use trapi::{Qualifier, ValidationMessages};

/// The fixed set of one-hop query derivations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransformKind {
    #[serde(rename = "BS")]
    BySubject,
    #[serde(rename = "BO")]
    ByObject,
    #[serde(rename = "IBNS")]
    InverseByNewSubject,
    #[serde(rename = "RSE")]
    RaiseSubjectEntity,
    #[serde(rename = "ROE")]
    RaiseObjectEntity,
    #[serde(rename = "ROBS")]
    RaiseObjectBySubject,
    #[serde(rename = "RPBS")]
    RaisePredicateBySubject,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown transform code: {0}")]
pub struct UnknownTransform(pub String);

impl TransformKind {
    pub const ALL: [TransformKind; 7] = [
        TransformKind::BySubject,
        TransformKind::ByObject,
        TransformKind::InverseByNewSubject,
        TransformKind::RaiseSubjectEntity,
        TransformKind::RaiseObjectEntity,
        TransformKind::RaiseObjectBySubject,
        TransformKind::RaisePredicateBySubject,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            TransformKind::BySubject => "BS",
            TransformKind::ByObject => "BO",
            TransformKind::InverseByNewSubject => "IBNS",
            TransformKind::RaiseSubjectEntity => "RSE",
            TransformKind::RaiseObjectEntity => "ROE",
            TransformKind::RaiseObjectBySubject => "ROBS",
            TransformKind::RaisePredicateBySubject => "RPBS",
        }
    }

    /// Name used in report keys and artifact file names
    pub fn test_name(&self) -> &'static str {
        match self {
            TransformKind::BySubject => "by_subject",
            TransformKind::ByObject => "by_object",
            TransformKind::InverseByNewSubject => "inverse_by_new_subject",
            TransformKind::RaiseSubjectEntity => "raise_subject_entity",
            TransformKind::RaiseObjectEntity => "raise_object_entity",
            TransformKind::RaiseObjectBySubject => "raise_object_by_subject",
            TransformKind::RaisePredicateBySubject => "raise_predicate_by_subject",
        }
    }

    pub fn from_code(code: &str) -> Option<TransformKind> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code().eq_ignore_ascii_case(code.trim()))
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TransformKind {
    type Err = UnknownTransform;

    /// Accepts either the short code (`RPBS`) or the test name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s)
            .or_else(|| Self::ALL.into_iter().find(|kind| kind.test_name() == s.trim()))
            .ok_or_else(|| UnknownTransform(s.to_string()))
    }
}

/// Role a KP plays in the provenance of the edges it returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Primary,
    #[default]
    Aggregator,
}

impl SourceType {
    /// TRAPI `resource_role` expected for this source type
    pub fn resource_role(&self) -> &'static str {
        match self {
            SourceType::Primary => trapi::types::PRIMARY_KNOWLEDGE_SOURCE,
            SourceType::Aggregator => trapi::types::AGGREGATOR_KNOWLEDGE_SOURCE,
        }
    }
}

/// One curated ground-truth assertion, normalized on load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEdge {
    /// Ordinal within the merged edge list of its resource
    pub idx: usize,
    pub subject_id: String,
    pub subject_category: String,
    pub predicate: String,
    pub object_id: String,
    pub object_category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qualifiers: Vec<Qualifier>,
    /// Effective exclusions: the edge's own plus its document set's
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub exclude_tests: BTreeSet<TransformKind>,
    /// Document the edge was read from
    pub location: String,
    #[serde(default, skip_serializing_if = "ValidationMessages::is_empty")]
    pub pre_validation: ValidationMessages,
}

impl TestEdge {
    /// Stable identifier of the edge within a run, `<resource>#<idx>`
    pub fn edge_id(&self, resource: &str) -> String {
        format!("{}#{}", resource, self.idx)
    }

    /// Flagged at load time; its variants are skipped rather than sent
    pub fn is_noncompliant(&self) -> bool {
        self.pre_validation.has_errors()
    }

    pub fn excludes(&self, kind: TransformKind) -> bool {
        self.exclude_tests.contains(&kind)
    }

    /// `subject --predicate--> object` for log lines
    pub fn triple(&self) -> String {
        format!("{} --{}--> {}", self.subject_id, self.predicate, self.object_id)
    }
}

/// All test edges of one KP, merged across its documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeTestSet {
    pub infores: String,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub exclude_tests: BTreeSet<TransformKind>,
    pub edges: Vec<TestEdge>,
}

impl EdgeTestSet {
    pub fn new(infores: impl Into<String>) -> Self {
        Self {
            infores: normalize_infores(&infores.into()),
            source_type: SourceType::default(),
            exclude_tests: BTreeSet::new(),
            edges: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// An ARA and the KPs it declares it can reach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AraConfig {
    pub infores: String,
    pub kps: Vec<String>,
}

impl AraConfig {
    pub fn new(infores: impl Into<String>, kps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut declared: Vec<String> = Vec::new();
        for kp in kps {
            let kp = normalize_infores(&kp.into());
            if !declared.contains(&kp) {
                declared.push(kp);
            }
        }
        Self {
            infores: normalize_infores(&infores.into()),
            kps: declared,
        }
    }

    pub fn declares(&self, kp: &str) -> bool {
        self.kps.iter().any(|k| k == kp)
    }
}

/// Strip the `infores:` prefix so `infores:molepro` and `molepro` compare equal
pub fn normalize_infores(infores: &str) -> String {
    let trimmed = infores.trim();
    trimmed
        .strip_prefix("infores:")
        .unwrap_or(trimmed)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_codes() {
        assert_eq!(TransformKind::ALL.len(), 7);
        for kind in TransformKind::ALL {
            assert_eq!(TransformKind::from_code(kind.code()), Some(kind));
            assert_eq!(kind.test_name().parse::<TransformKind>().unwrap(), kind);
        }
        assert_eq!(TransformKind::from_code("rpbs"), Some(TransformKind::RaisePredicateBySubject));
        assert!("XYZ".parse::<TransformKind>().is_err());
        assert_eq!(TransformKind::InverseByNewSubject.to_string(), "IBNS");
    }

    #[test]
    fn test_transform_serde_uses_codes() {
        let json = serde_json::to_string(&TransformKind::RaiseObjectBySubject).unwrap();
        assert_eq!(json, "\"ROBS\"");
        let kind: TransformKind = serde_json::from_str("\"BO\"").unwrap();
        assert_eq!(kind, TransformKind::ByObject);
    }

    #[test]
    fn test_source_type_default_is_aggregator() {
        assert_eq!(SourceType::default(), SourceType::Aggregator);
        let parsed: SourceType = serde_json::from_str("\"primary\"").unwrap();
        assert_eq!(parsed.resource_role(), "primary_knowledge_source");
    }

    #[test]
    fn test_infores_normalization() {
        assert_eq!(normalize_infores("infores:molepro"), "molepro");
        assert_eq!(normalize_infores(" molepro "), "molepro");

        let ara = AraConfig::new("infores:aragorn", ["infores:kp-a", "kp-b", "kp-a"]);
        assert_eq!(ara.infores, "aragorn");
        assert_eq!(ara.kps, vec!["kp-a".to_string(), "kp-b".to_string()]);
        assert!(ara.declares("kp-b"));
        assert!(!ara.declares("kp-c"));
    }
}
