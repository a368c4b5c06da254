use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;
use stream_core::{convert_or_null, DataTuple, Result, Schema, StreamError, Value};
use stream_runtime::{Arity, Emitter, Operator, Production};
use tracing::{debug, warn};

/// Where a scan reads its records from.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanSource {
    File(PathBuf),
    Lines(Vec<String>),
}

type RecordReader = csv::Reader<Box<dyn Read + Send>>;

/// Reads delimited text records and types every field through the schema.
///
/// Fields follow the usual CSV quoting rules. Fields that do not parse become
/// nulls; records with the wrong number of fields are skipped with a warning.
pub struct Scan {
    id: String,
    schema: Schema,
    source: ScanSource,
    delimiter: u8,
    skip_header: bool,
    batch_size: usize,
    reader: Option<RecordReader>,
    record: csv::StringRecord,
    records: u64,
}

impl Scan {
    pub fn new(id: impl Into<String>, schema: Schema, source: ScanSource) -> Result<Self> {
        if schema.is_empty() {
            return Err(StreamError::Configuration(
                "scan needs at least one attribute".to_string(),
            ));
        }
        for attribute in schema.attributes() {
            // Rejects types that cannot be read from text at all.
            stream_core::convert(&attribute.data_type(), "")?;
        }
        Ok(Self {
            id: id.into(),
            schema,
            source,
            delimiter: b',',
            skip_header: false,
            batch_size: 64,
            reader: None,
            record: csv::StringRecord::new(),
            records: 0,
        })
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_header(mut self, skip_header: bool) -> Self {
        self.skip_header = skip_header;
        self
    }

    fn parse(&self) -> Result<Option<DataTuple>> {
        let record = &self.record;
        if record.len() != self.schema.len() {
            warn!(
                operator = %self.id,
                line = record.position().map(|p| p.line()).unwrap_or_default(),
                expected = self.schema.len(),
                found = record.len(),
                "skipping malformed record"
            );
            return Ok(None);
        }
        let values = record
            .iter()
            .zip(self.schema.attributes())
            .map(|(field, attribute)| convert_or_null(&attribute.data_type(), field))
            .collect::<Result<Vec<Value>>>()?;
        Ok(Some(DataTuple::new(values)))
    }

    /// Reads the next record into the record buffer. Records that are not
    /// valid text are skipped.
    fn read_record(&mut self) -> Result<bool> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(false);
        };
        loop {
            match reader.read_record(&mut self.record) {
                Ok(more) => return Ok(more),
                Err(err) if err.is_io_error() => return Err(io::Error::from(err).into()),
                Err(err) => warn!(operator = %self.id, error = %err, "skipping unreadable record"),
            }
        }
    }
}

impl Operator for Scan {
    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "scan"
    }

    fn input_arity(&self) -> Arity {
        Arity::Exactly(0)
    }

    fn output_arity(&self) -> Arity {
        Arity::AtLeast(1)
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn open(&mut self) -> Result<()> {
        let input: Box<dyn Read + Send> = match &self.source {
            ScanSource::File(path) => {
                debug!(operator = %self.id, path = %path.display(), "opening input file");
                Box::new(File::open(path)?)
            }
            ScanSource::Lines(lines) => Box::new(Cursor::new(lines.join("\n").into_bytes())),
        };
        let reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.skip_header)
            .flexible(true)
            .from_reader(input);
        self.reader = Some(reader);
        Ok(())
    }

    fn produce(&mut self, out: &mut Emitter) -> Result<Production> {
        for _ in 0..self.batch_size {
            if !self.read_record()? {
                debug!(operator = %self.id, records = self.records, "scan finished");
                return Ok(Production::Exhausted);
            }
            self.records += 1;
            if let Some(tuple) = self.parse()? {
                out.emit(tuple)?;
            }
        }
        Ok(Production::Continue)
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stream_core::{Attribute, DataType, StreamElement};
    use stream_runtime::{Direction, Stream};

    fn schema() -> Schema {
        Schema::new(vec![
            Attribute::new("ts", DataType::Int64),
            Attribute::new("price", DataType::Float64),
            Attribute::new("symbol", DataType::Utf8),
        ])
    }

    fn scan_all(scan: &mut Scan) -> Vec<DataTuple> {
        let stream = Arc::new(Stream::new(0, "scan", "test", None));
        let mut out = Emitter::new(&[stream.clone()], 8, vec![]);
        scan.open().unwrap();
        while scan.produce(&mut out).unwrap() == Production::Continue {}
        out.flush().unwrap();

        let mut tuples = Vec::new();
        while let stream_runtime::Pull::Element(StreamElement::Data(t)) =
            stream.try_pull(Direction::Forward)
        {
            tuples.push(t);
        }
        tuples
    }

    #[test]
    fn test_reads_typed_records() {
        let lines = vec![
            "ts,price,symbol".to_string(),
            "1,10.5,ABC".to_string(),
            "2,NA,XYZ".to_string(),
            "".to_string(),
            "3,oops,ABC".to_string(),
        ];
        let mut scan = Scan::new("scan", schema(), ScanSource::Lines(lines))
            .unwrap()
            .with_header(true);
        let tuples = scan_all(&mut scan);

        assert_eq!(tuples.len(), 3);
        assert_eq!(
            tuples[0].values(),
            &[Value::Int64(1), Value::Float64(10.5), Value::from("ABC")]
        );
        assert_eq!(tuples[1].value(1), Some(&Value::Null));
        assert_eq!(tuples[2].value(1), Some(&Value::Null));
    }

    #[test]
    fn test_skips_malformed_records() {
        let lines = vec!["1;2.0;A".to_string(), "2;3.0".to_string()];
        let mut scan = Scan::new("scan", schema(), ScanSource::Lines(lines))
            .unwrap()
            .with_delimiter(b';');
        assert_eq!(scan_all(&mut scan).len(), 1);
    }

    #[test]
    fn test_quoted_fields_keep_delimiters() {
        let schema = Schema::new(vec![
            Attribute::new("ts", DataType::Int64),
            Attribute::new("name", DataType::Utf8),
        ]);
        let lines = vec![
            r#"1,"Smith, John""#.to_string(),
            r#"2,"plain""#.to_string(),
        ];
        let mut scan = Scan::new("scan", schema, ScanSource::Lines(lines)).unwrap();
        let tuples = scan_all(&mut scan);

        assert_eq!(tuples.len(), 2);
        assert_eq!(
            tuples[0].values(),
            &[Value::Int64(1), Value::from("Smith, John")]
        );
        assert_eq!(tuples[1].value(1), Some(&Value::from("plain")));
    }

    #[test]
    fn test_rejects_binary_attributes() {
        let schema = Schema::new(vec![Attribute::new("blob", DataType::Binary)]);
        let err = Scan::new("scan", schema, ScanSource::Lines(vec![]))
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::UnsupportedConversion(_)));
    }

    #[test]
    fn test_missing_file_fails_on_open() {
        let mut scan = Scan::new(
            "scan",
            schema(),
            ScanSource::File(PathBuf::from("/nonexistent/input.csv")),
        )
        .unwrap();
        assert!(matches!(scan.open(), Err(StreamError::Io(_))));
    }
}
