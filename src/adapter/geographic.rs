//! Geographic reference adapter
//!
//! Turns one gazetteer row into a Place plus the nodes that describe it:
//! the DataSet it belongs to, its name descriptor, its country and any
//! historical county or district names. Every node is scoped to the
//! toolchain that produced it.

use super::cancel::CancellationToken;
use super::traits::{Adapter, AdapterInput, EmitStats};
use crate::graph::{
    schema::name_set, BridgeError, BridgeResult, Label, NaturalKey, NodeId, Properties, Property,
    PropertyValue, RelType, UpsertEngine,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Toolchain name registered by the gazetteer import
pub const TOOLCHAIN_NAME: &str = "ipn2neo4j";
pub const TOOLCHAIN_VERSION: &str = "1.0.0";
/// Dataset year stamped on imported places unless configured otherwise
pub const DEFAULT_DATASET_YEAR: i64 = 2023;

pub const INPUT_KIND: &str = "reference-record";

/// Gazetteer column names
pub mod column {
    pub const PLACE_ID: &str = "PLACEID";
    pub const DESCRIPTOR: &str = "DESCNM";
    pub const LAT: &str = "LAT";
    pub const LON: &str = "LONG";
    pub const PLACE_CODE: &str = "PLACE22CD";
    pub const PLACE_NAME: &str = "PLACE22NM";
    pub const COUNTRY: &str = "CTRY22NM";
    pub const COUNTY_HISTORIC: &str = "CTYHISTNM";
    pub const COUNTY_1961: &str = "CTY61NM";
    pub const COUNTY_1991: &str = "CTY91NM";
    pub const COUNTY_LIEUTENANCY: &str = "CTYLTNM";
    pub const DISTRICT_1961: &str = "LAD61NM";
    pub const DISTRICT_1991: &str = "LAD91NM";
}

/// Optional historical name columns: (column, label, set)
const HISTORICAL_NAMES: [(&str, Label, &str); 6] = [
    (column::COUNTY_HISTORIC, Label::County, name_set::HISTORIC),
    (column::COUNTY_1961, Label::County, name_set::Y1961),
    (column::COUNTY_1991, Label::County, name_set::Y1991),
    (column::COUNTY_LIEUTENANCY, Label::County, name_set::LIEUTENANCY),
    (column::DISTRICT_1961, Label::LocalAuthorityDistrict, name_set::Y1961),
    (column::DISTRICT_1991, Label::LocalAuthorityDistrict, name_set::Y1991),
];

/// One gazetteer row together with the header it is read against.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRecord {
    header: Arc<Vec<String>>,
    values: Vec<String>,
}

impl ReferenceRecord {
    pub fn new(header: Arc<Vec<String>>, values: Vec<String>) -> Self {
        Self { header, values }
    }

    /// Build a record from borrowed strings (handy for one-off rows)
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let header = pairs.iter().map(|(c, _)| c.to_string()).collect();
        let values = pairs.iter().map(|(_, v)| v.to_string()).collect();
        Self::new(Arc::new(header), values)
    }

    /// Value of `column`, matched case-insensitively against the header.
    /// `None` when the header has no such column.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.header
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    /// Value of a required column
    pub fn require(&self, column: &str) -> BridgeResult<&str> {
        self.get(column)
            .ok_or_else(|| BridgeError::MissingColumn(column.to_string()))
    }

    /// Value of an optional column, `""` when absent
    pub fn optional(&self, column: &str) -> &str {
        self.get(column).unwrap_or("")
    }

    fn check_shape(&self) -> BridgeResult<()> {
        if self.values.len() != self.header.len() {
            return Err(BridgeError::MalformedInput(format!(
                "row has {} values but header has {} columns",
                self.values.len(),
                self.header.len()
            )));
        }
        Ok(())
    }
}

fn parse_coordinate(column: &str, raw: &str) -> BridgeResult<f64> {
    raw.trim().parse::<f64>().map_err(|_| {
        BridgeError::MalformedInput(format!("{} is not a coordinate: '{}'", column, raw))
    })
}

/// A required column whose trimmed value becomes part of a natural key.
fn key_field<'a>(
    record: &'a ReferenceRecord,
    column: &str,
    label: Label,
    property: Property,
) -> BridgeResult<&'a str> {
    let value = record.require(column)?.trim();
    if value.is_empty() {
        return Err(BridgeError::InvalidKey { label, property });
    }
    Ok(value)
}

/// Validated fields of one record, read before anything is written.
struct PlaceFields<'a> {
    id: &'a str,
    descriptor: &'a str,
    lat: f64,
    lon: f64,
    code: &'a str,
    name: &'a str,
    country: &'a str,
}

impl<'a> PlaceFields<'a> {
    fn read(record: &'a ReferenceRecord) -> BridgeResult<Self> {
        record.check_shape()?;
        let id = key_field(record, column::PLACE_ID, Label::Place, Property::Id)?;
        let descriptor = key_field(
            record,
            column::DESCRIPTOR,
            Label::PlaceNameDescriptor,
            Property::Code,
        )?;
        let lat = record.require(column::LAT)?;
        let lon = record.require(column::LON)?;
        let code = record.require(column::PLACE_CODE)?.trim();
        let name = record.require(column::PLACE_NAME)?.trim();
        let country = key_field(record, column::COUNTRY, Label::Country, Property::Name)?;

        Ok(Self {
            id,
            descriptor,
            lat: parse_coordinate(column::LAT, lat)?,
            lon: parse_coordinate(column::LON, lon)?,
            code,
            name,
            country,
        })
    }
}

/// Adapter for gazetteer reference records.
pub struct GeographicAdapter {
    engine: Arc<UpsertEngine>,
    toolchain: NodeId,
    year: i64,
}

impl GeographicAdapter {
    pub fn new(engine: Arc<UpsertEngine>, toolchain: NodeId) -> Self {
        Self {
            engine,
            toolchain,
            year: DEFAULT_DATASET_YEAR,
        }
    }

    pub fn with_year(mut self, year: i64) -> Self {
        self.year = year;
        self
    }

    pub fn toolchain(&self) -> NodeId {
        self.toolchain
    }

    fn scoped(&self, label: Label) -> NaturalKey {
        NaturalKey::new(label).with(Property::Toolchain, self.toolchain)
    }

    async fn describe(&self, stats: &mut EmitStats, key: NaturalKey, place: NodeId) -> BridgeResult<()> {
        let id = stats.record_node(self.engine.upsert_outcome(&key, Properties::new()).await?);
        stats.record_edge(self.engine.link(RelType::Describes, id, place).await?);
        Ok(())
    }

    /// Write one record. Returns what was created.
    ///
    /// Shape, required columns, coordinates and the key fields of the
    /// place, descriptor and country are checked before the first write,
    /// so a skipped or failed record leaves nothing behind.
    pub async fn ingest_record(&self, record: &ReferenceRecord) -> BridgeResult<EmitStats> {
        let fields = PlaceFields::read(record)?;
        let mut stats = EmitStats::new();

        let mut extra = Properties::new();
        extra.insert(Property::Type.as_str().into(), fields.descriptor.into());
        extra.insert(Property::Lat.as_str().into(), PropertyValue::Float(fields.lat));
        extra.insert(Property::Lon.as_str().into(), PropertyValue::Float(fields.lon));
        extra.insert(Property::Code.as_str().into(), fields.code.into());
        extra.insert(Property::Name.as_str().into(), fields.name.into());
        let place_key = self.scoped(Label::Place).with(Property::Id, fields.id);
        let place = stats.record_node(self.engine.upsert_outcome(&place_key, extra).await?);

        let dataset_key = self.scoped(Label::DataSet).with(Property::Year, self.year);
        let dataset = stats.record_node(
            self.engine
                .upsert_outcome(&dataset_key, Properties::new())
                .await?,
        );
        stats.record_edge(self.engine.link(RelType::PartOf, place, dataset).await?);

        self.describe(
            &mut stats,
            self.scoped(Label::PlaceNameDescriptor)
                .with(Property::Code, fields.descriptor),
            place,
        )
        .await?;

        self.describe(
            &mut stats,
            self.scoped(Label::Country).with(Property::Name, fields.country),
            place,
        )
        .await?;

        for (column, label, set) in HISTORICAL_NAMES {
            let name = record.optional(column).trim();
            if name.is_empty() {
                continue;
            }
            let key = self
                .scoped(label)
                .with(Property::Name, name)
                .with(Property::Set, set);
            self.describe(&mut stats, key, place).await?;
        }

        debug!(
            place = fields.id,
            nodes = stats.nodes_created,
            edges = stats.edges_created,
            "ingested reference record"
        );
        Ok(stats)
    }
}

#[async_trait]
impl Adapter for GeographicAdapter {
    fn id(&self) -> &str {
        "geographic"
    }

    fn input_kind(&self) -> &str {
        INPUT_KIND
    }

    async fn prepare(&self) -> BridgeResult<()> {
        self.engine.ensure_index(Label::Toolchain, &[Property::Name]).await?;
        self.engine.ensure_index(Label::Place, &[Property::Id]).await?;
        for label in [
            Label::Toolchain,
            Label::Place,
            Label::DataSet,
            Label::PlaceNameDescriptor,
            Label::Country,
            Label::County,
            Label::LocalAuthorityDistrict,
        ] {
            self.engine.ensure_unique_identity(label).await?;
        }
        Ok(())
    }

    async fn process(
        &self,
        input: &AdapterInput,
        cancel: &CancellationToken,
    ) -> BridgeResult<EmitStats> {
        cancel.check()?;
        let record = input.downcast_data::<ReferenceRecord>().ok_or_else(|| {
            BridgeError::MalformedInput(format!("{} is not a reference record", input.origin))
        })?;
        self.ingest_record(record).await
    }
}
