use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use polars::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::columns::AttributeDescriptor;
use crate::domain::RTVError;
use crate::values::{Field, RecordData, RowValue};

#[derive(Debug, Clone, Copy, PartialEq)]
enum FileType {
    CSV,
    PARQUET,
    ARROW,
}

#[derive(Debug)]
pub struct FileInfo {
    pub path: PathBuf,
    pub file_size: u64,
    file_type: FileType,
}

impl FileInfo {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("???")
            .to_string()
    }

    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("table")
            .to_string()
    }
}

fn detect_file_type(path: &Path) -> Result<FileType, RTVError> {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_uppercase())
        .as_deref()
    {
        Some("CSV") | Some("TSV") | Some("TXT") => Ok(FileType::CSV),
        Some("PARQUET") | Some("PQ") => Ok(FileType::PARQUET),
        Some("ARROW") | Some("IPC") | Some("FEATHER") => Ok(FileType::ARROW),
        _ => Err(RTVError::UnknownFileType),
    }
}

pub fn get_file_info(path: PathBuf) -> Result<FileInfo, RTVError> {
    let metadata = fs::metadata(&path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => RTVError::FileNotFound,
        ErrorKind::PermissionDenied => RTVError::PermissionDenied,
        _ => RTVError::IoError(e),
    })?;
    if !metadata.is_file() {
        return Err(RTVError::loading_failed(format!(
            "{} is not a file",
            path.display()
        )));
    }

    let file_type = detect_file_type(&path)?;

    Ok(FileInfo {
        file_size: metadata.len(),
        path,
        file_type,
    })
}

fn is_numeric_type(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

fn load_csv(path: &Path) -> Result<LazyFrame, PolarsError> {
    let separator = match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("tsv") | Some("txt") => b'\t',
        _ => b',',
    };
    LazyCsvReader::new(PlPath::Local(path.into()))
        .with_has_header(true)
        .with_separator(separator)
        .finish()
}

fn load_parquet(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyFrame::scan_parquet(PlPath::Local(path.into()), ScanArgsParquet::default())
}

fn load_arrow(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyFrame::scan_ipc(
        PlPath::Local(path.into()),
        polars::io::ipc::IpcScanOptions,
        UnifiedScanArgs::default(),
    )
}

/// Convert one frame column into row values, keeping its type information:
/// booleans stay flags, numeric columns become numbers, everything else is
/// read as text (with JSON link cells recognised).
fn load_field(df: &DataFrame, name: &str) -> Result<Field, PolarsError> {
    let column = df.column(name)?;
    let dtype = column.dtype().clone();

    let values: Vec<RowValue> = if dtype == DataType::Boolean {
        column
            .bool()?
            .into_iter()
            .map(|v| v.map_or(RowValue::Null, RowValue::Bool))
            .collect()
    } else if is_numeric_type(&dtype) {
        let numbers = column.cast(&DataType::Float64)?;
        numbers
            .f64()?
            .into_iter()
            .map(|v| v.map_or(RowValue::Null, RowValue::Number))
            .collect()
    } else {
        let text = column.cast(&DataType::String)?;
        text.str()?
            .into_iter()
            .map(|v| v.map_or(RowValue::Null, RowValue::from_cell))
            .collect()
    };

    debug!("Field \"{name}\" ({dtype}), {} values", values.len());
    Ok(Field {
        name: name.to_string(),
        values,
    })
}

/// Load the row matrix of a record table.
///
/// Each column is converted in its own rayon task; for wide tables this is
/// where most of the loading time goes.
#[instrument(skip(info), fields(path = %info.path.display(), size = info.file_size))]
pub fn load_record_data(info: &FileInfo) -> Result<RecordData, RTVError> {
    let frame = match info.file_type {
        FileType::CSV => load_csv(&info.path)?,
        FileType::PARQUET => load_parquet(&info.path)?,
        FileType::ARROW => load_arrow(&info.path)?,
    };

    let start_time = Instant::now();
    let df = Arc::new(frame.collect()?);
    let fields: Result<Vec<Field>, _> = df
        .get_column_names()
        .par_iter()
        .map(|name| load_field(&df, name))
        .collect();
    let data = RecordData::new(fields?);

    info!(
        "Loaded {} rows x {} fields in {}ms",
        data.len(),
        data.fields.len(),
        start_time.elapsed().as_millis()
    );
    Ok(data)
}

/// Read attribute metadata from a JSON array.
#[instrument]
pub fn load_attributes(path: &Path) -> Result<Vec<AttributeDescriptor>, RTVError> {
    let json = fs::read_to_string(path)?;
    let attributes: Vec<AttributeDescriptor> = serde_json::from_str(&json)?;
    if attributes.is_empty() {
        return Err(RTVError::loading_failed(format!(
            "{} lists no attributes",
            path.display()
        )));
    }
    info!("Loaded {} attributes", attributes.len());
    Ok(attributes)
}

/// Attribute metadata for data that comes without any: every field is
/// displayable and sortable under its own name.
pub fn attributes_from_fields(data: &RecordData) -> Vec<AttributeDescriptor> {
    data.fields
        .iter()
        .map(|f| AttributeDescriptor::new(f.name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn csv_columns_keep_their_types() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "variant,pvalue,flag,gene").unwrap();
        writeln!(file, "rs429358,5e-8,true,APOE").unwrap();
        writeln!(file, "rs7412,0.001,false,").unwrap();
        file.flush().unwrap();

        let info = get_file_info(file.path().to_path_buf()).unwrap();
        let data = load_record_data(&info).unwrap();
        assert_eq!(data.len(), 2);
        let field = |name: &str| data.field_index(name).unwrap();
        assert_eq!(data.value(field("pvalue"), 0), &RowValue::Number(5e-8));
        assert_eq!(data.value(field("flag"), 1), &RowValue::Bool(false));
        assert_eq!(
            data.value(field("variant"), 0),
            &RowValue::Text("rs429358".to_string())
        );
        assert_eq!(data.value(field("gene"), 1), &RowValue::Null);
    }

    #[test]
    fn tab_separated_with_upper_case_extension() {
        let mut file = tempfile::Builder::new().suffix(".TSV").tempfile().unwrap();
        write!(file, "gene\tpvalue\nAPOE\t0.5\n").unwrap();
        file.flush().unwrap();

        let info = get_file_info(file.path().to_path_buf()).unwrap();
        let data = load_record_data(&info).unwrap();
        let names: Vec<&str> = data.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["gene", "pvalue"]);
        assert_eq!(data.value(1, 0), &RowValue::Number(0.5));
    }

    #[test]
    fn unknown_files_are_rejected() {
        let file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        assert!(matches!(
            get_file_info(file.path().to_path_buf()),
            Err(RTVError::UnknownFileType)
        ));
        assert!(matches!(
            get_file_info(PathBuf::from("/does/not/exist.csv")),
            Err(RTVError::FileNotFound)
        ));
    }

    #[test]
    fn attributes_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "pvalue", "displayName": "p-Value", "help": "Association p-value"}},
                {{"name": "internal", "isDisplayable": false}}]"#
        )
        .unwrap();
        let attributes = load_attributes(file.path()).unwrap();
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0].display_name, "p-Value");
        assert!(attributes[0].is_sortable);
        assert!(!attributes[1].is_displayable);
    }
}
