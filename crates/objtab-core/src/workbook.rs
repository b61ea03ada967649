//! Workbooks: tabular files holding one sheet per model.
//!
//! Two on-disk encodings share one in-memory `Workbook`:
//!
//! - `.json`: `{ "schema": .., "schema_digest": .., "sheets": [{ "name", "columns", "rows" }] }`
//! - `.csv` / `.tsv`: a single delimited file. A `!!objtab` row carries the
//!   schema name and digest, and each sheet starts with a `!!<Model>` row
//!   followed by its header row. A header or data row whose first cell
//!   starts with `!!` or `\` gets one extra leading `\`, so it cannot be
//!   taken for a marker.
//!
//! Cells are text. Scalars use the `Value` cell codec; relationship cells hold
//! the primary keys of their targets, comma separated, with `,` and `\`
//! inside a key escaped by `\`.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dataset::{Dataset, Instance, InstanceId, Related};
use crate::error::WorkbookError;
use crate::schema::{AttributeKind, Schema};
use crate::value::Value;

const META_MARKER: &str = "!!objtab";
const SHEET_MARKER: &str = "!!";
const ESCAPE: char = '\\';

/// Leading cell of a non-marker row, as written to a delimited file.
fn escape_lead(cell: &str) -> String {
    if cell.starts_with(SHEET_MARKER) || cell.starts_with(ESCAPE) {
        format!("{ESCAPE}{cell}")
    } else {
        cell.to_string()
    }
}

fn unescape_lead(cell: &str) -> &str {
    cell.strip_prefix(ESCAPE).unwrap_or(cell)
}

fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        if c == ESCAPE || c == ',' {
            escaped.push(ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// Split a relationship cell into primary keys, honouring `\` escapes.
fn split_keys(cell: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut current = String::new();
    let mut chars = cell.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => current.extend(chars.next()),
            ',' => keys.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    keys.push(current);
    keys.into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workbook {
    pub schema: String,
    pub schema_digest: String,
    pub sheets: Vec<Sheet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkbookFormat {
    Json,
    Csv,
    Tsv,
}

impl WorkbookFormat {
    pub fn from_path(path: &Path) -> Result<Self, WorkbookError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(WorkbookFormat::Json),
            Some("csv") => Ok(WorkbookFormat::Csv),
            Some("tsv") => Ok(WorkbookFormat::Tsv),
            _ => Err(WorkbookError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    fn delimiter(self) -> u8 {
        match self {
            WorkbookFormat::Tsv => b'\t',
            _ => b',',
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Skip sheets that do not name a model instead of failing.
    pub ignore_extra_sheets: bool,
}

// ============================================================================
// File encoding
// ============================================================================

impl Workbook {
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn load(path: &Path) -> Result<Workbook, WorkbookError> {
        match WorkbookFormat::from_path(path)? {
            WorkbookFormat::Json => {
                let text = fs::read_to_string(path).map_err(|source| WorkbookError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str(&text).map_err(|source| WorkbookError::Json {
                    path: path.to_path_buf(),
                    source,
                })
            }
            format => load_delimited(path, format),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), WorkbookError> {
        match WorkbookFormat::from_path(path)? {
            WorkbookFormat::Json => {
                let mut text =
                    serde_json::to_string_pretty(self).map_err(|source| WorkbookError::Json {
                        path: path.to_path_buf(),
                        source,
                    })?;
                text.push('\n');
                fs::write(path, text).map_err(|source| WorkbookError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
            format => save_delimited(self, path, format),
        }
    }
}

fn load_delimited(path: &Path, format: WorkbookFormat) -> Result<Workbook, WorkbookError> {
    let csv_err = |source| WorkbookError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let format_err = |message: String| WorkbookError::Format {
        path: path.to_path_buf(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(format.delimiter())
        .from_path(path)
        .map_err(csv_err)?;

    let mut workbook = Workbook {
        schema: String::new(),
        schema_digest: String::new(),
        sheets: vec![],
    };
    // Set right after a sheet marker: the next record is that sheet's header.
    let mut expecting_header = false;

    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
        let Some(first) = fields.first() else {
            continue;
        };

        if first == META_MARKER {
            for field in &fields[1..] {
                match field.split_once('=') {
                    Some(("schema", v)) => workbook.schema = v.to_string(),
                    Some(("digest", v)) => workbook.schema_digest = v.to_string(),
                    _ => return Err(format_err(format!("unknown metadata field '{field}'"))),
                }
            }
            continue;
        }

        if let Some(name) = first.strip_prefix(SHEET_MARKER) {
            if expecting_header {
                return Err(format_err("sheet marker without a header row".to_string()));
            }
            workbook.sheets.push(Sheet {
                name: name.trim().to_string(),
                columns: vec![],
                rows: vec![],
            });
            expecting_header = true;
            continue;
        }

        if let Some(lead) = fields.first_mut() {
            *lead = unescape_lead(lead).to_string();
        }
        let Some(sheet) = workbook.sheets.last_mut() else {
            return Err(format_err(format!(
                "row before the first sheet marker: {}",
                fields.join(",")
            )));
        };
        if expecting_header {
            sheet.columns = fields;
            expecting_header = false;
        } else {
            sheet.rows.push(fields);
        }
    }

    if expecting_header {
        return Err(format_err("sheet marker without a header row".to_string()));
    }
    Ok(workbook)
}

fn save_delimited(wb: &Workbook, path: &Path, format: WorkbookFormat) -> Result<(), WorkbookError> {
    let csv_err = |source| WorkbookError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .delimiter(format.delimiter())
        .from_path(path)
        .map_err(csv_err)?;

    writer
        .write_record([
            META_MARKER.to_string(),
            format!("schema={}", wb.schema),
            format!("digest={}", wb.schema_digest),
        ])
        .map_err(csv_err)?;
    for sheet in &wb.sheets {
        writer
            .write_record([format!("{SHEET_MARKER}{}", sheet.name)])
            .map_err(csv_err)?;
        for row in std::iter::once(&sheet.columns).chain(&sheet.rows) {
            let escaped = row
                .iter()
                .enumerate()
                .map(|(i, cell)| if i == 0 { escape_lead(cell) } else { cell.clone() });
            writer.write_record(escaped).map_err(csv_err)?;
        }
    }
    writer.flush().map_err(|source| WorkbookError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// Workbook <-> Dataset
// ============================================================================

/// Read a workbook file into a dataset. Returns the dataset and the sheet
/// names in file order.
pub fn read_dataset(
    path: &Path,
    schema: &Schema,
    options: ReadOptions,
) -> Result<(Dataset, Vec<String>), WorkbookError> {
    let workbook = Workbook::load(path)?;
    if !workbook.schema_digest.is_empty()
        && !schema.digest().is_empty()
        && workbook.schema_digest != schema.digest()
    {
        warn!(
            path = %path.display(),
            written_with = %workbook.schema_digest,
            reading_with = %schema.digest(),
            "workbook was written with a different schema version"
        );
    }
    let dataset = workbook_to_dataset(&workbook, schema, options)?;
    debug!(path = %path.display(), instances = dataset.len(), "read workbook");
    Ok((dataset, workbook.sheet_names()))
}

struct PendingLink<'a> {
    source: InstanceId,
    attribute: &'a str,
    target_model: &'a str,
    to_many: bool,
    keys: Vec<String>,
}

pub fn workbook_to_dataset(
    workbook: &Workbook,
    schema: &Schema,
    options: ReadOptions,
) -> Result<Dataset, WorkbookError> {
    let mut errors = Vec::new();
    let mut dataset = Dataset::new();
    let mut by_key: HashMap<(&str, &str), InstanceId> = HashMap::new();
    let mut links: Vec<PendingLink<'_>> = Vec::new();

    for sheet in &workbook.sheets {
        let Some(model) = schema.model(&sheet.name) else {
            if options.ignore_extra_sheets {
                debug!(sheet = %sheet.name, "ignoring sheet without a model");
            } else {
                errors.push(format!(
                    "sheet '{}' does not correspond to a model of schema '{}'",
                    sheet.name,
                    schema.name()
                ));
            }
            continue;
        };

        let mut columns = Vec::with_capacity(sheet.columns.len());
        let mut seen = BTreeSet::new();
        for column in &sheet.columns {
            if !seen.insert(column.as_str()) {
                errors.push(format!("sheet '{}' repeats column '{column}'", sheet.name));
            }
            match model.attribute(column) {
                Some(attr) => columns.push(attr),
                None => errors.push(format!(
                    "sheet '{}' has column '{column}', which is not an attribute of '{}'",
                    sheet.name, model.name
                )),
            }
        }
        if columns.len() != sheet.columns.len() {
            continue;
        }

        for (row_index, row) in sheet.rows.iter().enumerate() {
            let row_no = row_index + 1;
            if row.len() > columns.len() {
                errors.push(format!(
                    "sheet '{}' row {row_no} has {} cells, but there are only {} columns",
                    sheet.name,
                    row.len(),
                    columns.len()
                ));
                continue;
            }

            let id = dataset.add(Instance::new(model.name.clone()));
            for (attr, cell) in columns.iter().zip(row) {
                match &attr.kind {
                    AttributeKind::Scalar(ty) => match Value::parse_cell(ty, cell) {
                        Ok(Some(value)) => {
                            if attr.primary {
                                let key = cell.trim();
                                if by_key.insert((model.name.as_str(), key), id).is_some() {
                                    errors.push(format!(
                                        "model '{}' has duplicated primary key '{key}'",
                                        model.name
                                    ));
                                }
                            }
                            dataset[id].set_value(&attr.name, value);
                        }
                        Ok(None) => {}
                        Err(message) => errors.push(format!(
                            "sheet '{}' row {row_no} column '{}': {message}",
                            sheet.name, attr.name
                        )),
                    },
                    AttributeKind::Related(rel) => {
                        let keys = split_keys(cell);
                        if !rel.cardinality.is_to_many() && keys.len() > 1 {
                            errors.push(format!(
                                "sheet '{}' row {row_no} column '{}' holds {} references, but '{}' is {}",
                                sheet.name,
                                attr.name,
                                keys.len(),
                                attr.name,
                                rel.cardinality.keyword()
                            ));
                            continue;
                        }
                        links.push(PendingLink {
                            source: id,
                            attribute: &attr.name,
                            target_model: &rel.target,
                            to_many: rel.cardinality.is_to_many(),
                            keys,
                        });
                    }
                }
            }
        }
    }

    for link in links {
        let mut ids = Vec::with_capacity(link.keys.len());
        for key in &link.keys {
            match by_key.get(&(link.target_model, key.as_str())) {
                Some(target) => ids.push(*target),
                None => errors.push(format!(
                    "{}.{} of {} references {} '{key}', which does not exist",
                    dataset[link.source].model(),
                    link.attribute,
                    dataset.describe(schema, link.source),
                    link.target_model
                )),
            }
        }
        let related = if link.to_many {
            Related::Many(ids)
        } else {
            Related::One(ids.first().copied())
        };
        dataset[link.source].set_related(link.attribute, related);
    }

    if !errors.is_empty() {
        return Err(WorkbookError::Invalid { errors });
    }
    Ok(dataset)
}

/// Lay a dataset out as sheets in `model_order`.
pub fn dataset_to_workbook(
    dataset: &Dataset,
    model_order: &[String],
    schema: &Schema,
) -> Result<Workbook, WorkbookError> {
    let mut errors = Vec::new();

    for (model, count) in dataset.counts() {
        if !model_order.iter().any(|m| m == model) {
            errors.push(format!(
                "{count} instance(s) of model '{model}' are not covered by the sheet order"
            ));
        }
    }

    let mut sheets = Vec::with_capacity(model_order.len());
    for model_name in model_order {
        let Some(model) = schema.model(model_name) else {
            errors.push(format!(
                "model '{model_name}' in the sheet order is not defined by schema '{}'",
                schema.name()
            ));
            continue;
        };

        let mut ids: Vec<InstanceId> = dataset.ids_of(model_name).collect();
        if model.primary_attribute().is_some() {
            ids.sort_by(|a, b| {
                dataset
                    .primary_key(schema, *a)
                    .cmp(&dataset.primary_key(schema, *b))
            });
        }

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let inst = &dataset[id];
            let mut row = Vec::with_capacity(model.attributes.len());
            for attr in &model.attributes {
                let cell = match &attr.kind {
                    AttributeKind::Scalar(_) => {
                        inst.value(&attr.name).map(Value::to_cell).unwrap_or_default()
                    }
                    AttributeKind::Related(_) => {
                        let mut keys = Vec::new();
                        for target in inst.targets(&attr.name) {
                            match dataset.primary_key(schema, target) {
                                Some(key) => keys.push(escape_key(key)),
                                None => errors.push(format!(
                                    "{}.{} of {} references {}, which has no primary key",
                                    model.name,
                                    attr.name,
                                    dataset.describe(schema, id),
                                    dataset.describe(schema, target)
                                )),
                            }
                        }
                        keys.join(", ")
                    }
                };
                row.push(cell);
            }
            rows.push(row);
        }

        sheets.push(Sheet {
            name: model.name.clone(),
            columns: model.attributes.iter().map(|a| a.name.clone()).collect(),
            rows,
        });
    }

    if !errors.is_empty() {
        return Err(WorkbookError::Invalid { errors });
    }
    Ok(Workbook {
        schema: schema.name().to_string(),
        schema_digest: schema.digest().to_string(),
        sheets,
    })
}

/// Write a dataset to `path` (format chosen by extension).
pub fn write_dataset(
    path: &Path,
    dataset: &Dataset,
    model_order: &[String],
    schema: &Schema,
) -> Result<PathBuf, WorkbookError> {
    let workbook = dataset_to_workbook(dataset, model_order, schema)?;
    workbook.save(path)?;
    debug!(path = %path.display(), sheets = workbook.sheets.len(), "wrote workbook");
    Ok(path.to_path_buf())
}
