//! Exporter configuration materialization.
//!
//! Turns a [`GenerationRequest`] into the generator's `key = value` properties
//! file. Every exporter starts disabled; the request enables exactly the
//! exporters implied by its output formats through a declarative table.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tokio::sync::Mutex;

use crate::error::ExporterError;
use crate::request::{GenerationRequest, OutputFormat};

pub const BASE_DIRECTORY: &str = "exporter.baseDirectory";
pub const YEARS_OF_HISTORY: &str = "exporter.years_of_history";
pub const SPLIT_RECORDS: &str = "exporter.split_records";
pub const METADATA_EXPORT: &str = "exporter.metadata.export";
pub const HTML_EXPORT: &str = "exporter.html.export";
pub const TEXT_EXPORT: &str = "exporter.text.export";
pub const TEXT_PER_ENCOUNTER_EXPORT: &str = "exporter.text.per_encounter_export";
pub const CLINICAL_NOTE_EXPORT: &str = "exporter.clinical_note.export";
pub const HOSPITAL_FHIR_EXPORT: &str = "exporter.hospital.fhir.export";
pub const PRACTITIONER_FHIR_EXPORT: &str = "exporter.practitioner.fhir.export";
pub const FHIR_EXPORT: &str = "exporter.fhir.export";
pub const FHIR_US_CORE_IG: &str = "exporter.fhir.use_us_core_ig";
pub const FHIR_STU3_EXPORT: &str = "exporter.fhir_stu3.export";
pub const FHIR_DSTU2_EXPORT: &str = "exporter.fhir_dstu2.export";
pub const CCDA_EXPORT: &str = "exporter.ccda.export";
pub const CSV_EXPORT: &str = "exporter.csv.export";
pub const JSON_EXPORT: &str = "exporter.json.export";
pub const CPCDS_EXPORT: &str = "exporter.cpcds.export";
pub const HL7_EXPORT: &str = "exporter.hl7.export";
pub const HL7_VERSION: &str = "exporter.hl7.version";

/// Flags every run writes as `false` unless a requested format enables them.
const EXPORTER_FLAGS: [&str; 17] = [
    METADATA_EXPORT,
    HTML_EXPORT,
    TEXT_EXPORT,
    TEXT_PER_ENCOUNTER_EXPORT,
    CLINICAL_NOTE_EXPORT,
    HOSPITAL_FHIR_EXPORT,
    PRACTITIONER_FHIR_EXPORT,
    FHIR_EXPORT,
    FHIR_US_CORE_IG,
    FHIR_STU3_EXPORT,
    FHIR_DSTU2_EXPORT,
    CCDA_EXPORT,
    CSV_EXPORT,
    JSON_EXPORT,
    CPCDS_EXPORT,
    HL7_EXPORT,
    // kept last so the version line follows the hl7 flag
    HL7_VERSION,
];

/// Flags enabled by one output format.
pub fn flags_for(format: OutputFormat) -> &'static [&'static str] {
    match format {
        OutputFormat::FhirR4 => &[FHIR_EXPORT],
        OutputFormat::FhirR4Plus => &[FHIR_EXPORT, FHIR_US_CORE_IG],
        OutputFormat::FhirStu3 => &[FHIR_STU3_EXPORT],
        OutputFormat::FhirDstu2 => &[FHIR_DSTU2_EXPORT],
        OutputFormat::Ccda => &[CCDA_EXPORT],
        OutputFormat::Csv => &[CSV_EXPORT],
        OutputFormat::Json => &[JSON_EXPORT],
        OutputFormat::Cpcds => &[CPCDS_EXPORT],
        OutputFormat::Hl7 => &[HOSPITAL_FHIR_EXPORT, PRACTITIONER_FHIR_EXPORT, HL7_EXPORT],
        OutputFormat::Text => &[TEXT_EXPORT],
        OutputFormat::CdaText => &[CLINICAL_NOTE_EXPORT],
        OutputFormat::Html => &[HTML_EXPORT],
    }
}

/// A single property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Bool(bool),
    Text(String),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{b}"),
            ConfigValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Ordered generator properties derived from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterConfig {
    entries: IndexMap<String, ConfigValue>,
    dropped_fhir_variants: Vec<OutputFormat>,
}

impl ExporterConfig {
    /// The all-disabled baseline rooted at `base_directory`.
    pub fn baseline(base_directory: &Path) -> Self {
        let mut base = base_directory.to_string_lossy().into_owned();
        if !base.ends_with('/') {
            base.push('/');
        }

        let mut entries = IndexMap::new();
        entries.insert(BASE_DIRECTORY.to_string(), ConfigValue::Text(base));
        entries.insert(YEARS_OF_HISTORY.to_string(), ConfigValue::Text("0".into()));
        entries.insert(SPLIT_RECORDS.to_string(), ConfigValue::Bool(false));
        for key in EXPORTER_FLAGS {
            let value = if key == HL7_VERSION {
                ConfigValue::Text("2.4".into())
            } else {
                ConfigValue::Bool(false)
            };
            entries.insert(key.to_string(), value);
        }

        Self {
            entries,
            dropped_fhir_variants: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    /// `true` only when the key is present and set to boolean true.
    pub fn is_enabled(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(ConfigValue::Bool(true)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// FHIR variants that lost to a higher-precedence variant.
    pub fn dropped_fhir_variants(&self) -> &[OutputFormat] {
        &self.dropped_fhir_variants
    }

    /// Render as `key = value` lines in stable order.
    pub fn to_properties(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push_str(" = ");
            out.push_str(&value.to_string());
            out.push('\n');
        }
        out
    }

    fn enable(&mut self, key: &str) {
        self.entries.insert(key.to_string(), ConfigValue::Bool(true));
    }
}

/// Derive the generator configuration for `request`.
///
/// Pure: two requests with the same format set produce identical configs
/// regardless of the order the formats were supplied in. When more than one
/// FHIR variant is requested the first in canonical order wins.
pub fn materialize(request: &GenerationRequest, base_directory: &Path) -> ExporterConfig {
    let mut config = ExporterConfig::baseline(base_directory);
    config.entries.insert(
        YEARS_OF_HISTORY.to_string(),
        ConfigValue::Text(request.history_years.to_string()),
    );

    let mut fhir_selected: Option<OutputFormat> = None;
    for format in &request.output_formats {
        if format.is_fhir() {
            if let Some(winner) = fhir_selected {
                tracing::warn!(
                    requested = %format,
                    selected = %winner,
                    "only one FHIR version may be exported per run; ignoring"
                );
                config.dropped_fhir_variants.push(*format);
                continue;
            }
            fhir_selected = Some(*format);
        }
        for key in flags_for(*format) {
            config.enable(key);
        }
        tracing::debug!(format = %format, "enabling format");
    }

    config
}

/// Serialized writer for the shared properties file.
///
/// Writers queue on an async mutex and replace the file atomically, so a
/// reader never observes a partially written configuration.
#[derive(Debug)]
pub struct ConfigWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ConfigWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub async fn write(&self, config: &ExporterConfig) -> Result<(), ExporterError> {
        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        let contents = config.to_properties();

        let result = tokio::task::spawn_blocking(move || write_atomic(&path, contents.as_bytes()))
            .await
            .unwrap_or_else(|join| Err(std::io::Error::other(join)));

        result.map_err(|source| ExporterError::ConfigWrite {
            path: self.path.clone(),
            source,
        })?;
        tracing::info!(path = %self.path.display(), entries = config.len(), "generator configuration written");
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
