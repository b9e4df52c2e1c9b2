//! Generation request accepted from the operator UI.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// Upper bound for `history_years`; the generator has no meaningful use for more.
pub const MAX_HISTORY_YEARS: u32 = 200;

/// Output formats the generator can export.
///
/// Declaration order is the canonical order. It drives FHIR precedence and
/// the ordering of `BTreeSet<OutputFormat>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    #[serde(rename = "fhir_r4", alias = "FHIR_R4")]
    FhirR4,
    #[serde(rename = "fhir_r4plus", alias = "FHIR_R4PLUS")]
    FhirR4Plus,
    #[serde(rename = "fhir_stu3", alias = "FHIR_STU3")]
    FhirStu3,
    #[serde(rename = "fhir_dstu2", alias = "FHIR_DSTU2")]
    FhirDstu2,
    #[serde(rename = "ccda", alias = "CCDA")]
    Ccda,
    #[serde(rename = "csv", alias = "CSV")]
    Csv,
    #[serde(rename = "json", alias = "JSON")]
    Json,
    #[serde(rename = "cpcds", alias = "CPCDS")]
    Cpcds,
    #[serde(rename = "hl7", alias = "HL7")]
    Hl7,
    #[serde(rename = "text", alias = "TEXT")]
    Text,
    #[serde(rename = "cdatext", alias = "CDATEXT")]
    CdaText,
    #[serde(rename = "html", alias = "HTML")]
    Html,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 12] = [
        OutputFormat::FhirR4,
        OutputFormat::FhirR4Plus,
        OutputFormat::FhirStu3,
        OutputFormat::FhirDstu2,
        OutputFormat::Ccda,
        OutputFormat::Csv,
        OutputFormat::Json,
        OutputFormat::Cpcds,
        OutputFormat::Hl7,
        OutputFormat::Text,
        OutputFormat::CdaText,
        OutputFormat::Html,
    ];

    /// Returns the wire name of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::FhirR4 => "fhir_r4",
            OutputFormat::FhirR4Plus => "fhir_r4plus",
            OutputFormat::FhirStu3 => "fhir_stu3",
            OutputFormat::FhirDstu2 => "fhir_dstu2",
            OutputFormat::Ccda => "ccda",
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Cpcds => "cpcds",
            OutputFormat::Hl7 => "hl7",
            OutputFormat::Text => "text",
            OutputFormat::CdaText => "cdatext",
            OutputFormat::Html => "html",
        }
    }

    /// FHIR variants share one exporter family; only one may be active per run.
    pub fn is_fhir(&self) -> bool {
        matches!(
            self,
            OutputFormat::FhirR4
                | OutputFormat::FhirR4Plus
                | OutputFormat::FhirStu3
                | OutputFormat::FhirDstu2
        )
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        OutputFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == needle)
            .ok_or_else(|| RequestError::UnknownFormat(s.trim().to_string()))
    }
}

/// A request to run the generator once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(rename = "num_patients", alias = "patient_count")]
    pub patient_count: u32,
    #[serde(rename = "state", alias = "region", default)]
    pub region: Option<String>,
    #[serde(default)]
    pub history_years: u32,
    #[serde(default)]
    pub output_formats: BTreeSet<OutputFormat>,
    #[serde(rename = "no_numbers", alias = "suppress_name_numbering", default)]
    pub suppress_name_numbering: bool,
}

impl GenerationRequest {
    pub fn new(patient_count: u32, output_formats: impl IntoIterator<Item = OutputFormat>) -> Self {
        Self {
            patient_count,
            region: None,
            history_years: 0,
            output_formats: output_formats.into_iter().collect(),
            suppress_name_numbering: false,
        }
    }

    /// Validate and normalize the request. A blank region becomes `None`.
    pub fn validated(mut self) -> Result<Self, RequestError> {
        if self.patient_count == 0 {
            return Err(RequestError::invalid("num_patients must be > 0"));
        }
        if self.history_years > MAX_HISTORY_YEARS {
            return Err(RequestError::invalid(format!(
                "history_years must be <= {MAX_HISTORY_YEARS}"
            )));
        }
        self.region = self
            .region
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if let Some(region) = &self.region
            && region.starts_with('-')
        {
            return Err(RequestError::invalid("state must not start with '-'"));
        }
        Ok(self)
    }

    /// Build a request from `application/x-www-form-urlencoded` pairs.
    ///
    /// `output_formats` may repeat or carry a comma separated list.
    pub fn from_form_pairs<I, K, V>(pairs: I) -> Result<Self, RequestError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut patient_count = None;
        let mut request = GenerationRequest::new(0, []);

        for (key, value) in pairs {
            let value = value.as_ref().trim();
            match key.as_ref() {
                "num_patients" | "patient_count" => {
                    let n = value.parse::<u32>().map_err(|_| {
                        RequestError::invalid(format!("num_patients is not a number: {value}"))
                    })?;
                    patient_count = Some(n);
                }
                "state" | "region" => request.region = Some(value.to_string()),
                "history_years" => {
                    request.history_years = value.parse::<u32>().map_err(|_| {
                        RequestError::invalid(format!("history_years is not a number: {value}"))
                    })?;
                }
                "no_numbers" | "suppress_name_numbering" => {
                    request.suppress_name_numbering = parse_form_bool(value);
                }
                "output_formats" | "output_formats[]" => {
                    for part in value.split(',').filter(|p| !p.trim().is_empty()) {
                        request.output_formats.insert(part.parse()?);
                    }
                }
                other => tracing::debug!(field = other, "ignoring unknown form field"),
            }
        }

        request.patient_count =
            patient_count.ok_or_else(|| RequestError::invalid("num_patients is required"))?;
        Ok(request)
    }
}

fn parse_form_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "on" | "1" | "yes"
    )
}
