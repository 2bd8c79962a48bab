use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::read::DeflateDecoder;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::FileAccessError;

use super::model::{checked_coordinate, Batch, MeasuredValue, Record, COLUMNS};

// ---------------------------------------------------------------------------
// NumPy `.npy` / `.npz` reader
// ---------------------------------------------------------------------------
//
// Layout: magic `\x93NUMPY`, version (major, minor), header length (u16 for
// v1, u32 for v2/v3), an ASCII Python dict literal, then the raw row-major
// array. Only the data bytes for the requested row range are ever buffered.
//
// An `.npz` is a zip archive of `.npy` members. The `data` member is read in
// place from the archive file, inflated on the fly when it is deflated.

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Member read from an `.npz` archive when it holds more than one array.
const NPZ_MEMBER: &str = "data.npy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F8,
    F4,
    I8,
    I4,
    /// `<U{n}`: `n` UTF-32 code units per cell, NUL padded.
    Unicode(usize),
    /// `|S{n}`: `n` bytes per cell, NUL padded.
    Bytes(usize),
}

impl Dtype {
    fn from_descr(descr: &str) -> Result<Self, String> {
        let width = |n: &str| n.parse::<usize>().ok().filter(|w| *w > 0);
        match descr {
            "<f8" => Ok(Dtype::F8),
            "<f4" => Ok(Dtype::F4),
            "<i8" => Ok(Dtype::I8),
            "<i4" => Ok(Dtype::I4),
            "|O" => Err("object arrays need pickle and are not supported".into()),
            d if d.starts_with('>') => Err(format!("big-endian dtype '{d}' is not supported")),
            d => {
                if let Some(n) = d.strip_prefix("<U").and_then(width) {
                    Ok(Dtype::Unicode(n))
                } else if let Some(n) = d.strip_prefix("|S").and_then(width) {
                    Ok(Dtype::Bytes(n))
                } else {
                    Err(format!("unsupported dtype '{d}'"))
                }
            }
        }
    }

    fn size(self) -> usize {
        match self {
            Dtype::F8 | Dtype::I8 => 8,
            Dtype::F4 | Dtype::I4 => 4,
            Dtype::Unicode(n) => 4 * n,
            Dtype::Bytes(n) => n,
        }
    }

    fn decode(self, b: &[u8]) -> Cell {
        match self {
            Dtype::F8 => Cell::Number(f64::from_le_bytes(b[..8].try_into().unwrap_or([0; 8]))),
            Dtype::F4 => Cell::Number(f32::from_le_bytes(b[..4].try_into().unwrap_or([0; 4])) as f64),
            Dtype::I8 => Cell::Number(i64::from_le_bytes(b[..8].try_into().unwrap_or([0; 8])) as f64),
            Dtype::I4 => Cell::Number(i32::from_le_bytes(b[..4].try_into().unwrap_or([0; 4])) as f64),
            Dtype::Unicode(n) => Cell::Text(
                b[..4 * n]
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .take_while(|&c| c != 0)
                    .filter_map(char::from_u32)
                    .collect(),
            ),
            Dtype::Bytes(n) => {
                let raw = &b[..n];
                let end = raw.iter().position(|&c| c == 0).unwrap_or(n);
                Cell::Text(String::from_utf8_lossy(&raw[..end]).into_owned())
            }
        }
    }
}

/// One decoded array element.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Number(f64),
    Text(String),
}

impl Cell {
    fn into_text(self) -> String {
        match self {
            Cell::Number(v) => format_cell(v),
            Cell::Text(s) => s,
        }
    }

    fn measured(&self) -> MeasuredValue {
        match self {
            Cell::Number(v) => MeasuredValue::from_f64(*v),
            Cell::Text(s) => MeasuredValue::parse(s),
        }
    }

    fn coordinate(&self) -> Option<f64> {
        let v = match self {
            Cell::Number(v) => Some(*v),
            Cell::Text(s) => s.trim().parse::<f64>().ok(),
        };
        checked_coordinate(v)
    }
}

#[derive(Debug, PartialEq)]
struct Header {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<u64>,
}

pub(crate) struct NpyReader {
    path: PathBuf,
    source: Box<dyn Read + Send>,
    dtype: Dtype,
    rows: u64,
    next_row: u64,
}

impl NpyReader {
    pub(crate) fn open(path: &Path) -> Result<Self, FileAccessError> {
        let file = File::open(path).map_err(|e| open_error(path, e))?;
        let len = file.metadata().map_err(|e| open_error(path, e))?.len();
        Self::from_stream(path, Box::new(BufReader::new(file)), len)
    }

    /// Open the array stored in an `.npz` archive: `data.npy`, or the only
    /// `.npy` member if there is just one.
    pub(crate) fn open_npz(path: &Path) -> Result<Self, FileAccessError> {
        let schema_err = |reason: String| FileAccessError::Schema {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| open_error(path, e))?;
        let mut archive =
            ZipArchive::new(file).map_err(|e| schema_err(format!("not an .npz archive: {e}")))?;
        let name = npz_member(&archive).ok_or_else(|| {
            schema_err(format!("archive has no '{NPZ_MEMBER}' array"))
        })?;

        let (method, start, packed, size) = {
            let member = archive
                .by_name(&name)
                .map_err(|e| schema_err(format!("{name}: {e}")))?;
            (
                member.compression(),
                member.data_start(),
                member.compressed_size(),
                member.size(),
            )
        };

        let mut file = archive.into_inner();
        file.seek(SeekFrom::Start(start))
            .map_err(|e| open_error(path, e))?;
        let raw = BufReader::new(file).take(packed);
        let source: Box<dyn Read + Send> = match method {
            CompressionMethod::Stored => Box::new(raw),
            CompressionMethod::Deflated => Box::new(BufReader::new(DeflateDecoder::new(raw))),
            other => return Err(schema_err(format!("{name}: unsupported compression {other:?}"))),
        };
        Self::from_stream(path, source, size)
    }

    /// `len` is the byte length of the whole `.npy` stream, header included.
    fn from_stream(
        path: &Path,
        mut source: Box<dyn Read + Send>,
        len: u64,
    ) -> Result<Self, FileAccessError> {
        let schema_err = |reason: String| FileAccessError::Schema {
            path: path.to_path_buf(),
            reason,
        };

        let mut magic = [0u8; 6];
        source
            .read_exact(&mut magic)
            .map_err(|_| schema_err("not a .npy file".into()))?;
        if &magic != MAGIC {
            return Err(schema_err("not a .npy file".into()));
        }

        let mut version = [0u8; 2];
        source
            .read_exact(&mut version)
            .map_err(|e| schema_err(e.to_string()))?;
        let (header_len, prefix_len) = match version[0] {
            1 => {
                let mut b = [0u8; 2];
                source.read_exact(&mut b).map_err(|e| schema_err(e.to_string()))?;
                (u16::from_le_bytes(b) as usize, 10u64)
            }
            2 | 3 => {
                let mut b = [0u8; 4];
                source.read_exact(&mut b).map_err(|e| schema_err(e.to_string()))?;
                (u32::from_le_bytes(b) as usize, 12u64)
            }
            v => return Err(schema_err(format!("unsupported .npy version {v}.{}", version[1]))),
        };

        let mut raw = vec![0u8; header_len];
        source
            .read_exact(&mut raw)
            .map_err(|e| schema_err(format!("truncated header: {e}")))?;
        let text = String::from_utf8_lossy(&raw);
        let header = parse_header(&text).map_err(schema_err)?;

        if header.fortran_order {
            return Err(schema_err("Fortran-ordered arrays are not supported".into()));
        }
        let rows = match header.shape.as_slice() {
            [rows, cols] if *cols == COLUMNS.len() as u64 => *rows,
            shape => {
                return Err(schema_err(format!(
                    "expected a 2-D array with {} columns, got shape {shape:?}",
                    COLUMNS.len()
                )))
            }
        };

        let data_offset = prefix_len + header_len as u64;
        let row_bytes = (header.dtype.size() * COLUMNS.len()) as u64;
        let expected = rows.saturating_mul(row_bytes);
        let available = len.saturating_sub(data_offset);
        if available < expected {
            return Err(schema_err(format!(
                "data section truncated: expected {expected} bytes, found {available}"
            )));
        }

        Ok(NpyReader {
            path: path.to_path_buf(),
            source,
            dtype: header.dtype,
            rows,
            next_row: 0,
        })
    }

    /// Read up to `max` rows, or `None` once the array is exhausted.
    pub(crate) fn read_rows(&mut self, max: usize) -> Result<Option<Batch>, FileAccessError> {
        if self.next_row >= self.rows {
            return Ok(None);
        }
        let offset = self.next_row;
        let n = (self.rows - offset).min(max as u64) as usize;
        let width = self.dtype.size();
        let row_bytes = width * COLUMNS.len();

        let mut buf = vec![0u8; n * row_bytes];
        self.source
            .read_exact(&mut buf)
            .map_err(|e| FileAccessError::Read {
                path: self.path.clone(),
                offset,
                reason: e.to_string(),
            })?;

        let mut records = Vec::with_capacity(n);
        for (i, row) in buf.chunks_exact(row_bytes).enumerate() {
            let cell = |c: usize| self.dtype.decode(&row[c * width..]);
            let row_no = offset + i as u64;
            let coord = |c: usize, column: &'static str| {
                cell(c).coordinate().ok_or_else(|| FileAccessError::MalformedCoordinate {
                    path: self.path.clone(),
                    row: row_no,
                    column,
                })
            };
            records.push(Record {
                id: cell(0).into_text(),
                value: cell(1).measured(),
                longitude: coord(2, "longitude")?,
                latitude: coord(3, "latitude")?,
                timestamp: cell(4).into_text(),
            });
        }

        self.next_row += n as u64;
        Ok(Some(Batch { offset, records }))
    }
}

fn open_error(path: &Path, e: io::Error) -> FileAccessError {
    FileAccessError::Open {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn npz_member<R: Read + Seek>(archive: &ZipArchive<R>) -> Option<String> {
    if archive.file_names().any(|n| n == NPZ_MEMBER) {
        return Some(NPZ_MEMBER.to_string());
    }
    let mut arrays = archive.file_names().filter(|n| n.ends_with(".npy"));
    match (arrays.next(), arrays.next()) {
        (Some(only), None) => Some(only.to_string()),
        _ => None,
    }
}

/// Magic, version 1.0, header length and the padded header dict.
fn header_bytes(descr: &str, rows: usize) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '{descr}', 'fortran_order': False, 'shape': ({rows}, {}), }}",
        COLUMNS.len()
    );
    // magic + version + u16 length + header + '\n' must be a multiple of 64
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut out = Vec::with_capacity(10 + header.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out
}

fn write_f8_array<W: Write>(out: &mut W, rows: &[[f64; 5]]) -> io::Result<()> {
    out.write_all(&header_bytes("<f8", rows.len()))?;
    for row in rows {
        for cell in row {
            out.write_all(&cell.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Write `rows` as a little-endian `<f8` array of shape `(rows, 5)`.
///
/// Used by the sample generator and by tests to produce fixture files.
pub fn write_npy(path: &Path, rows: &[[f64; 5]]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_f8_array(&mut out, rows)?;
    out.flush()
}

/// Write `rows` as the `data` array of an uncompressed `.npz` archive, the
/// layout `numpy.savez(path, data=rows)` produces.
pub fn write_npz(path: &Path, rows: &[[f64; 5]]) -> io::Result<()> {
    let mut zip = ZipWriter::new(File::create(path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    zip.start_file(NPZ_MEMBER, options).map_err(io::Error::other)?;
    write_f8_array(&mut zip, rows)?;
    zip.finish().map_err(io::Error::other)?;
    Ok(())
}

/// Integral floats print without a fractional part so ids read naturally.
fn format_cell(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 9.0e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn parse_header(text: &str) -> Result<Header, String> {
    let descr = dict_value(text, "descr")
        .and_then(quoted)
        .ok_or("header has no 'descr'")?;
    let dtype = Dtype::from_descr(descr)?;

    let fortran_order = match dict_value(text, "fortran_order") {
        Some(v) if v.starts_with("True") => true,
        Some(v) if v.starts_with("False") => false,
        _ => return Err("header has no 'fortran_order'".into()),
    };

    let shape_src = dict_value(text, "shape")
        .and_then(|v| v.strip_prefix('('))
        .and_then(|v| v.split_once(')'))
        .map(|(inner, _)| inner)
        .ok_or("header has no 'shape'")?;
    let shape = shape_src
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().map_err(|_| format!("bad shape entry '{s}'")))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Header {
        dtype,
        fortran_order,
        shape,
    })
}

/// Text following `'key':` in the header dict.
fn dict_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    for quote in ['\'', '"'] {
        let needle = format!("{quote}{key}{quote}");
        if let Some(pos) = text.find(&needle) {
            let rest = text[pos + needle.len()..].trim_start();
            return rest.strip_prefix(':').map(str::trim_start);
        }
    }
    None
}

fn quoted(v: &str) -> Option<&str> {
    let q = v.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let rest = &v[1..];
    rest.find(q).map(|end| &rest[..end])
}
