//! NETC-FASTag Acquiring: toll and parking plaza master data.

use async_trait::async_trait;

use onboard_core::changes::MutabilityPolicy;
use onboard_core::error::CoreError;
use onboard_core::metadata::{Metadata, MetadataRules};
use onboard_core::row::{extract_fields, has_fields};
use onboard_core::types::Row;

use crate::plugin::{ProductDescriptor, ProductPlugin, RemoteEndpoint};
use crate::reconciler::EntitySpec;
use crate::registry::PluginSettings;

pub const DESCRIPTOR: ProductDescriptor = ProductDescriptor {
    code: "FASTAG_ACQ",
    folder: "fastagacq",
    display_name: "NETC-FASTag Acquiring",
};

const TICKET_PATTERN: &str = r"^APB-[0-9]+$";
const TICKET_HINT: &str = "APB-XXXXXX";

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

pub const TABLE_PLAZA: &str = "NETCACQ_PLAZA_DTLS";
pub const TABLE_CONCESSIONAIRE: &str = "NETCACQ_PLAZA_CONCESSION_DTLS";
pub const TABLE_LANE: &str = "NETCACQ_PLAZA_LANE_DTLS";
pub const TABLE_FARE: &str = "NETCACQ_PLAZA_FARE_DTLS";
pub const TABLE_VEHICLE_MAPPING: &str = "NETCACQ_VHCLCLASS_MAPPING_DTLS";
pub const TABLE_USER_MAPPING: &str = "NETCACQ_USER_ROLE_MAPPING_DTLS";

const ENTITIES: &[EntitySpec] = &[
    EntitySpec {
        label: "plaza",
        prefix: "plaza",
        table: TABLE_PLAZA,
        primary_key: &["plaza_id"],
    },
    EntitySpec {
        label: "concessionaire",
        prefix: "conc",
        table: TABLE_CONCESSIONAIRE,
        primary_key: &["concessionaire_id"],
    },
    EntitySpec {
        label: "lane",
        prefix: "lane",
        table: TABLE_LANE,
        primary_key: &["plaza_id", "lane_id"],
    },
    EntitySpec {
        label: "fare",
        prefix: "fare",
        table: TABLE_FARE,
        primary_key: &["fare_id"],
    },
    EntitySpec {
        label: "vehicle_mapping",
        prefix: "vmap",
        table: TABLE_VEHICLE_MAPPING,
        primary_key: &["plaza_id", "mvc_id"],
    },
    EntitySpec {
        label: "user_mapping",
        prefix: "umap",
        table: TABLE_USER_MAPPING,
        primary_key: &["user_id"],
    },
];

/// Sub-entities a plaza type requires, with the name used in errors.
fn required_for(plaza_type: &str) -> &'static [(&'static str, &'static str)] {
    match plaza_type {
        "parking" => &[("conc", "concessionaire"), ("lane", "lane")],
        "toll" => &[
            ("conc", "concessionaire"),
            ("lane", "lane"),
            ("fare", "fare"),
            ("vmap", "vehicle mapping"),
        ],
        _ => &[],
    }
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

pub struct FastagAcqPlugin {
    rules: MetadataRules,
    policy: MutabilityPolicy,
    remote_root: Option<String>,
}

impl FastagAcqPlugin {
    pub fn new(settings: &PluginSettings) -> Result<Self, CoreError> {
        let mut rules = MetadataRules::new(TICKET_PATTERN, TICKET_HINT)?;
        if settings.restricted {
            rules = rules.with_allowed_submitters(settings.allowed_submitters.clone());
        }

        let policy = ENTITIES
            .iter()
            .fold(MutabilityPolicy::new(), |policy, entity| {
                policy.with_table(entity.table, ["modified_ts"])
            });

        Ok(Self {
            rules,
            policy,
            remote_root: settings.remote_root(DESCRIPTOR.code),
        })
    }
}

#[async_trait]
impl ProductPlugin for FastagAcqPlugin {
    fn descriptor(&self) -> &ProductDescriptor {
        &DESCRIPTOR
    }

    fn entities(&self) -> &[EntitySpec] {
        ENTITIES
    }

    fn mutability(&self) -> &MutabilityPolicy {
        &self.policy
    }

    fn remote_endpoint(&self) -> Option<RemoteEndpoint> {
        self.remote_root
            .as_ref()
            .map(|root| RemoteEndpoint { root: root.clone() })
    }

    fn validate_metadata(&self, metadata: &Metadata) -> Result<(), CoreError> {
        self.rules.validate(metadata)
    }

    fn validate_structure(&self, row: &Row) -> Result<(), CoreError> {
        if !has_fields(row, "plaza") {
            return Ok(());
        }
        let plaza_type = extract_fields(row, "plaza")
            .get("type")
            .map(|t| t.to_ascii_lowercase())
            .unwrap_or_default();

        for (prefix, name) in required_for(&plaza_type) {
            if !has_fields(row, prefix) {
                return Err(CoreError::Validation(format!(
                    "For {plaza_type} plaza type, {name} data is mandatory"
                )));
            }
        }
        Ok(())
    }
}
