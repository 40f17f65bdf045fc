//! NetCDF classic decoder
//!
//! Reads the classic binary format (CDF-1, plus the 64-bit-offset CDF-2
//! variant) directly; no system NetCDF library is involved. Only the
//! subset the float archives use is supported: big-endian scalars, fixed
//! and record variables, `_FillValue` masking. Anything structurally off
//! fails the decode of that archive alone.
//!
//! Variable lookup is case-insensitive. The measurement grid is taken
//! from the pressure variable: profiles padded out to a common level
//! count mask the padding with fill values, and those levels are dropped.

use crate::convert::decode::{juld_to_datetime, ArchiveDecoder, DecodedArchive, ObservationRow};
use crate::error::PipelineError;
use crate::types::{EntryKey, LocalFileDescriptor};
use tracing::debug;

// Header list tags
const NC_DIMENSION: u32 = 0x0A;
const NC_VARIABLE: u32 = 0x0B;
const NC_ATTRIBUTE: u32 = 0x0C;

// External data types
const NC_BYTE: u32 = 1;
const NC_CHAR: u32 = 2;
const NC_SHORT: u32 = 3;
const NC_INT: u32 = 4;
const NC_FLOAT: u32 = 5;
const NC_DOUBLE: u32 = 6;

// Default fill values (netcdf.h), applied when a variable declares none
const FILL_BYTE: f64 = -127.0;
const FILL_SHORT: f64 = -32_767.0;
const FILL_INT: f64 = -2_147_483_647.0;
const FILL_FLOAT: f64 = 9.969_209_968_386_869e36;
const FILL_DOUBLE: f64 = 9.969_209_968_386_869e36;

/// Upper bound on header list lengths; classic headers are tiny and
/// anything past this is a corrupt length field, not a real file.
const MAX_LIST_ELEMS: usize = 1 << 16;

/// Decoder for NetCDF classic profile archives
#[derive(Debug, Default, Clone, Copy)]
pub struct NetcdfDecoder;

impl NetcdfDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveDecoder for NetcdfDecoder {
    fn decode(&self, archive: &LocalFileDescriptor) -> crate::error::Result<DecodedArchive> {
        let bytes = std::fs::read(&archive.path).map_err(|e| PipelineError::Decode {
            path: archive.path.display().to_string(),
            reason: format!("read failed: {}", e),
        })?;
        decode_profile_bytes(&bytes, &archive.key).map_err(|reason| PipelineError::Decode {
            path: archive.path.display().to_string(),
            reason,
        })
    }
}

/// Decode one classic-format archive into observation rows
fn decode_profile_bytes(
    bytes: &[u8],
    key: &EntryKey,
) -> std::result::Result<DecodedArchive, String> {
    let file = NcFile::parse(bytes)?;

    let juld = file
        .numeric_var("juld")?
        .ok_or_else(|| "missing juld variable".to_string())?;
    let lat = file
        .numeric_var("latitude")?
        .ok_or_else(|| "missing latitude variable".to_string())?;
    let lon = file
        .numeric_var("longitude")?
        .ok_or_else(|| "missing longitude variable".to_string())?;
    let pres = file
        .numeric_var("pres")?
        .ok_or_else(|| "missing pres variable".to_string())?;
    let temp = file
        .numeric_var("temp")?
        .ok_or_else(|| "missing temp variable".to_string())?;
    let psal = file.numeric_var("psal")?;
    let missing_salinity = psal.is_none();

    // The pressure shape defines the (profile, level) grid
    let (n_prof, n_levels) = match pres.shape.len() {
        1 => (1, pres.shape[0]),
        2 => (pres.shape[0], pres.shape[1]),
        n => return Err(format!("pres has {} dimensions, expected 1 or 2", n)),
    };

    if temp.values.len() != pres.values.len() {
        return Err(format!(
            "temp length {} does not match pres length {}",
            temp.values.len(),
            pres.values.len()
        ));
    }
    if let Some(psal) = &psal {
        if psal.values.len() != pres.values.len() {
            return Err(format!(
                "psal length {} does not match pres length {}",
                psal.values.len(),
                pres.values.len()
            ));
        }
    }

    let mut rows = Vec::new();
    for p in 0..n_prof {
        let juld_val = per_profile(&juld, "juld", p, n_prof)?;
        if juld.is_fill(juld_val) {
            debug!(key = %key, profile = p, "profile has no timestamp; dropped");
            continue;
        }
        let Some(ts) = juld_to_datetime(juld_val) else {
            debug!(key = %key, profile = p, juld = juld_val, "juld out of range; profile dropped");
            continue;
        };

        let lat_val = per_profile(&lat, "latitude", p, n_prof)?;
        let lon_val = per_profile(&lon, "longitude", p, n_prof)?;
        let latitude = if lat.is_fill(lat_val) { f64::NAN } else { lat_val };
        let longitude = if lon.is_fill(lon_val) { f64::NAN } else { lon_val };

        for l in 0..n_levels {
            let idx = p * n_levels + l;
            let pres_val = pres.values[idx];
            // Fill pressure marks a padding level, not a measurement
            if pres.is_fill(pres_val) {
                continue;
            }
            let temp_val = temp.values[idx];
            let temperature_c = if temp.is_fill(temp_val) {
                f32::NAN
            } else {
                temp_val as f32
            };
            let salinity_psu = psal.as_ref().and_then(|v| {
                let s = v.values[idx];
                if v.is_fill(s) {
                    None
                } else {
                    Some(s as f32)
                }
            });

            rows.push(ObservationRow {
                platform_id: key.platform_id.clone(),
                cycle_number: key.cycle_number,
                level: l as i32,
                juld: ts,
                latitude,
                longitude,
                pressure_dbar: pres_val as f32,
                temperature_c,
                salinity_psu,
                region: key.region,
            });
        }
    }

    Ok(DecodedArchive {
        rows,
        missing_salinity,
    })
}

/// Value of a per-profile variable; length-one variables broadcast
fn per_profile(
    var: &VarData,
    name: &str,
    p: usize,
    n_prof: usize,
) -> std::result::Result<f64, String> {
    match var.values.len() {
        1 => Ok(var.values[0]),
        len if len == n_prof => Ok(var.values[p]),
        len => Err(format!(
            "{} length {} does not match profile count {}",
            name, len, n_prof
        )),
    }
}

struct NcDim {
    #[allow(dead_code)]
    name: String,
    /// Zero marks the record dimension
    len: u32,
}

struct NcVar {
    name: String,
    dimids: Vec<usize>,
    nc_type: u32,
    fill: f64,
    begin: u64,
    is_record: bool,
}

/// Values of one variable, flattened in row-major order
struct VarData {
    values: Vec<f64>,
    shape: Vec<usize>,
    fill: f64,
}

impl VarData {
    /// Fill comparison tolerates float-to-double promotion wobble when the
    /// attribute type differs from the variable type.
    fn is_fill(&self, value: f64) -> bool {
        !value.is_finite()
            || value == self.fill
            || (self.fill != 0.0 && ((value - self.fill) / self.fill).abs() < 1e-6)
    }
}

struct NcFile<'a> {
    buf: &'a [u8],
    numrecs: u32,
    dims: Vec<NcDim>,
    vars: Vec<NcVar>,
    /// Byte distance between consecutive records in the record slab
    record_stride: u64,
}

impl<'a> NcFile<'a> {
    fn parse(buf: &'a [u8]) -> std::result::Result<Self, String> {
        let mut cur = Cursor::new(buf);

        let magic = cur.take(4)?;
        if &magic[..3] != b"CDF" {
            return Err("not a NetCDF classic file (bad magic)".to_string());
        }
        let version = magic[3];
        if version != 1 && version != 2 {
            return Err(format!("unsupported NetCDF version byte {}", version));
        }

        let numrecs = cur.u32()?;
        if numrecs == u32::MAX {
            return Err("streaming record count is not supported".to_string());
        }

        let dims = parse_dim_list(&mut cur)?;
        // Global attributes carry nothing the decode needs
        parse_att_list(&mut cur)?;
        let vars = parse_var_list(&mut cur, &dims, version)?;

        // Multiple record variables interleave per record; a single record
        // variable is stored contiguously without inter-record padding.
        let record_vars: Vec<&NcVar> = vars.iter().filter(|v| v.is_record).collect();
        let record_stride = if record_vars.len() == 1 {
            unpadded_record_size(record_vars[0], &dims)?
        } else {
            let mut stride: u64 = 0;
            for var in &record_vars {
                stride = stride
                    .checked_add(padded_record_size(var, &dims)?)
                    .ok_or_else(|| "record stride overflows".to_string())?;
            }
            stride
        };

        Ok(Self {
            buf,
            numrecs,
            dims,
            vars,
            record_stride,
        })
    }

    fn find_var(&self, name: &str) -> Option<&NcVar> {
        self.vars.iter().find(|v| v.name.eq_ignore_ascii_case(name))
    }

    /// Dimension lengths with the record dimension resolved to `numrecs`
    fn var_shape(&self, var: &NcVar) -> Vec<usize> {
        var.dimids
            .iter()
            .map(|&d| {
                let len = self.dims[d].len;
                if len == 0 {
                    self.numrecs as usize
                } else {
                    len as usize
                }
            })
            .collect()
    }

    /// Read a numeric variable by case-insensitive name
    fn numeric_var(&self, name: &str) -> std::result::Result<Option<VarData>, String> {
        let Some(var) = self.find_var(name) else {
            return Ok(None);
        };
        if var.nc_type == NC_CHAR {
            return Err(format!("variable {} is char typed, expected numeric", var.name));
        }
        let values = self.read_values(var)?;
        Ok(Some(VarData {
            values,
            shape: self.var_shape(var),
            fill: var.fill,
        }))
    }

    fn read_values(&self, var: &NcVar) -> std::result::Result<Vec<f64>, String> {
        let tsize = type_size(var.nc_type)?;
        let per_slab = var
            .dimids
            .iter()
            .filter(|&&d| self.dims[d].len != 0)
            .try_fold(1usize, |acc, &d| acc.checked_mul(self.dims[d].len as usize))
            .ok_or_else(|| format!("variable {} shape overflows", var.name))?;
        let slab_bytes = per_slab
            .checked_mul(tsize)
            .ok_or_else(|| format!("variable {} slab overflows", var.name))?;

        if var.is_record {
            let mut out = Vec::new();
            for r in 0..u64::from(self.numrecs) {
                let start = var
                    .begin
                    .checked_add(r.checked_mul(self.record_stride).ok_or("record offset overflows")?)
                    .ok_or("record offset overflows")?;
                let bytes = self.slice(start, slab_bytes, &var.name)?;
                decode_values_into(var.nc_type, bytes, &mut out)?;
            }
            Ok(out)
        } else {
            let bytes = self.slice(var.begin, slab_bytes, &var.name)?;
            let mut out = Vec::with_capacity(per_slab);
            decode_values_into(var.nc_type, bytes, &mut out)?;
            Ok(out)
        }
    }

    fn slice(&self, start: u64, len: usize, name: &str) -> std::result::Result<&'a [u8], String> {
        let start = usize::try_from(start).map_err(|_| format!("offset of {} overflows", name))?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| format!("data for {} extends past end of file", name))?;
        Ok(&self.buf[start..end])
    }
}

fn parse_dim_list(cur: &mut Cursor<'_>) -> std::result::Result<Vec<NcDim>, String> {
    let (tag, nelems) = list_header(cur, NC_DIMENSION, "dimension")?;
    if tag == 0 {
        return Ok(Vec::new());
    }
    let mut dims = Vec::with_capacity(nelems);
    for _ in 0..nelems {
        let name = cur.name()?;
        let len = cur.u32()?;
        dims.push(NcDim { name, len });
    }
    Ok(dims)
}

/// Parse an attribute list, keeping only a scalar `_FillValue`
fn parse_att_list(cur: &mut Cursor<'_>) -> std::result::Result<Option<f64>, String> {
    let (tag, nelems) = list_header(cur, NC_ATTRIBUTE, "attribute")?;
    if tag == 0 {
        return Ok(None);
    }
    let mut fill = None;
    for _ in 0..nelems {
        let name = cur.name()?;
        let nc_type = cur.u32()?;
        let count = cur.u32()? as usize;
        let byte_len = count
            .checked_mul(type_size(nc_type)?)
            .ok_or_else(|| format!("attribute {} length overflows", name))?;
        let bytes = cur.take(byte_len)?;
        cur.skip_pad(byte_len)?;
        if name == "_FillValue" && count == 1 {
            fill = scalar_from_bytes(nc_type, bytes);
        }
    }
    Ok(fill)
}

fn parse_var_list(
    cur: &mut Cursor<'_>,
    dims: &[NcDim],
    version: u8,
) -> std::result::Result<Vec<NcVar>, String> {
    let (tag, nelems) = list_header(cur, NC_VARIABLE, "variable")?;
    if tag == 0 {
        return Ok(Vec::new());
    }
    let mut vars = Vec::with_capacity(nelems);
    for _ in 0..nelems {
        let name = cur.name()?;
        let ndims = cur.u32()? as usize;
        if ndims > MAX_LIST_ELEMS {
            return Err(format!("variable {} has implausible rank {}", name, ndims));
        }
        let mut dimids = Vec::with_capacity(ndims);
        for _ in 0..ndims {
            let id = cur.u32()? as usize;
            if id >= dims.len() {
                return Err(format!("variable {} references unknown dimension {}", name, id));
            }
            dimids.push(id);
        }
        let declared_fill = parse_att_list(cur)?;
        let nc_type = cur.u32()?;
        type_size(nc_type)?;
        let _vsize = cur.u32()?;
        let begin = if version == 1 {
            u64::from(cur.u32()?)
        } else {
            cur.u64()?
        };
        // Only the leading dimension may be the record dimension
        let is_record = dimids.first().map(|&d| dims[d].len == 0).unwrap_or(false);
        if dimids.iter().skip(1).any(|&d| dims[d].len == 0) {
            return Err(format!("variable {} has interior record dimension", name));
        }
        let fill = declared_fill.unwrap_or(default_fill(nc_type));
        vars.push(NcVar {
            name,
            dimids,
            nc_type,
            fill,
            begin,
            is_record,
        });
    }
    Ok(vars)
}

/// Read a list header; ABSENT (two zero words) yields tag 0
fn list_header(
    cur: &mut Cursor<'_>,
    expected_tag: u32,
    what: &str,
) -> std::result::Result<(u32, usize), String> {
    let tag = cur.u32()?;
    let nelems = cur.u32()? as usize;
    if tag == 0 && nelems == 0 {
        return Ok((0, 0));
    }
    if tag != expected_tag {
        return Err(format!("expected {} list tag, found {:#x}", what, tag));
    }
    if nelems > MAX_LIST_ELEMS {
        return Err(format!("{} list claims {} elements", what, nelems));
    }
    Ok((tag, nelems))
}

fn type_size(nc_type: u32) -> std::result::Result<usize, String> {
    match nc_type {
        NC_BYTE | NC_CHAR => Ok(1),
        NC_SHORT => Ok(2),
        NC_INT | NC_FLOAT => Ok(4),
        NC_DOUBLE => Ok(8),
        other => Err(format!("unknown external type {}", other)),
    }
}

fn default_fill(nc_type: u32) -> f64 {
    match nc_type {
        NC_BYTE => FILL_BYTE,
        NC_SHORT => FILL_SHORT,
        NC_INT => FILL_INT,
        NC_DOUBLE => FILL_DOUBLE,
        _ => FILL_FLOAT,
    }
}

fn scalar_from_bytes(nc_type: u32, bytes: &[u8]) -> Option<f64> {
    match (nc_type, bytes) {
        (NC_BYTE, [b]) => Some(f64::from(*b as i8)),
        (NC_SHORT, [a, b]) => Some(f64::from(i16::from_be_bytes([*a, *b]))),
        (NC_INT, [a, b, c, d]) => Some(f64::from(i32::from_be_bytes([*a, *b, *c, *d]))),
        (NC_FLOAT, [a, b, c, d]) => Some(f64::from(f32::from_be_bytes([*a, *b, *c, *d]))),
        (NC_DOUBLE, [a, b, c, d, e, f, g, h]) => {
            Some(f64::from_be_bytes([*a, *b, *c, *d, *e, *f, *g, *h]))
        }
        _ => None,
    }
}

fn decode_values_into(
    nc_type: u32,
    bytes: &[u8],
    out: &mut Vec<f64>,
) -> std::result::Result<(), String> {
    match nc_type {
        NC_BYTE => out.extend(bytes.iter().map(|&b| f64::from(b as i8))),
        NC_SHORT => out.extend(
            bytes
                .chunks_exact(2)
                .map(|c| f64::from(i16::from_be_bytes([c[0], c[1]]))),
        ),
        NC_INT => out.extend(
            bytes
                .chunks_exact(4)
                .map(|c| f64::from(i32::from_be_bytes([c[0], c[1], c[2], c[3]]))),
        ),
        NC_FLOAT => out.extend(
            bytes
                .chunks_exact(4)
                .map(|c| f64::from(f32::from_be_bytes([c[0], c[1], c[2], c[3]]))),
        ),
        NC_DOUBLE => out.extend(bytes.chunks_exact(8).map(|c| {
            f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
        })),
        _ => return Err("char variable has no numeric values".to_string()),
    }
    Ok(())
}

/// Per-record byte size without trailing padding
fn unpadded_record_size(var: &NcVar, dims: &[NcDim]) -> std::result::Result<u64, String> {
    let count = var
        .dimids
        .iter()
        .filter(|&&d| dims[d].len != 0)
        .try_fold(1u64, |acc, &d| acc.checked_mul(u64::from(dims[d].len)))
        .ok_or_else(|| format!("variable {} shape overflows", var.name))?;
    count
        .checked_mul(type_size(var.nc_type)? as u64)
        .ok_or_else(|| format!("variable {} record size overflows", var.name))
}

/// Per-record byte size rounded up to the 4-byte boundary
fn padded_record_size(var: &NcVar, dims: &[NcDim]) -> std::result::Result<u64, String> {
    let raw = unpadded_record_size(var, dims)?;
    raw.checked_add(3)
        .map(|n| n & !3)
        .ok_or_else(|| format!("variable {} record size overflows", var.name))
}

/// Bounds-checked big-endian reader over the header bytes
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| format!("truncated file: wanted {} bytes at offset {}", n, self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> std::result::Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> std::result::Result<u64, String> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Length-prefixed name, padded to the 4-byte boundary
    fn name(&mut self) -> std::result::Result<String, String> {
        let len = self.u32()? as usize;
        if len > MAX_LIST_ELEMS {
            return Err(format!("name length {} is implausible", len));
        }
        let bytes = self.take(len)?;
        let name = std::str::from_utf8(bytes)
            .map_err(|_| "name is not valid utf-8".to_string())?
            .to_string();
        self.skip_pad(len)?;
        Ok(name)
    }

    fn skip_pad(&mut self, len: usize) -> std::result::Result<(), String> {
        let rem = len % 4;
        if rem != 0 {
            self.take(4 - rem)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::Region;

    const F_FILL: f64 = 99_999.0;
    const J_FILL: f64 = 999_999.0;

    /// Test-only classic file builder. Dimensions with length zero are
    /// record dimensions; `numrecs` supplies their actual extent.
    struct TestVar {
        name: &'static str,
        nc_type: u32,
        dimids: Vec<u32>,
        fill: Option<f64>,
        data: Vec<f64>,
    }

    fn fvar(name: &'static str, dimids: Vec<u32>, data: Vec<f64>) -> TestVar {
        TestVar {
            name,
            nc_type: NC_FLOAT,
            dimids,
            fill: Some(F_FILL),
            data,
        }
    }

    fn dvar(name: &'static str, dimids: Vec<u32>, data: Vec<f64>) -> TestVar {
        TestVar {
            name,
            nc_type: NC_DOUBLE,
            dimids,
            fill: Some(J_FILL),
            data,
        }
    }

    fn pad4(buf: &mut Vec<u8>) {
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
    }

    fn put_name(buf: &mut Vec<u8>, name: &str) {
        buf.extend((name.len() as u32).to_be_bytes());
        buf.extend(name.as_bytes());
        pad4(buf);
    }

    fn encode_value(buf: &mut Vec<u8>, nc_type: u32, value: f64) {
        match nc_type {
            NC_BYTE | NC_CHAR => buf.push(value as i8 as u8),
            NC_SHORT => buf.extend((value as i16).to_be_bytes()),
            NC_INT => buf.extend((value as i32).to_be_bytes()),
            NC_FLOAT => buf.extend((value as f32).to_be_bytes()),
            NC_DOUBLE => buf.extend(value.to_be_bytes()),
            _ => unreachable!(),
        }
    }

    fn fixed_count(var: &TestVar, dims: &[(&str, u32)]) -> usize {
        var.dimids
            .iter()
            .map(|&d| dims[d as usize].1 as usize)
            .filter(|&len| len != 0)
            .product()
    }

    fn vsize(var: &TestVar, dims: &[(&str, u32)]) -> u32 {
        let raw = fixed_count(var, dims) * type_size(var.nc_type).unwrap();
        ((raw + 3) & !3) as u32
    }

    fn emit_header(
        dims: &[(&str, u32)],
        vars: &[TestVar],
        begins: &[u32],
        numrecs: u32,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(b"CDF\x01");
        out.extend(numrecs.to_be_bytes());

        out.extend(NC_DIMENSION.to_be_bytes());
        out.extend((dims.len() as u32).to_be_bytes());
        for (name, len) in dims {
            put_name(&mut out, name);
            out.extend(len.to_be_bytes());
        }

        // No global attributes
        out.extend(0u32.to_be_bytes());
        out.extend(0u32.to_be_bytes());

        out.extend(NC_VARIABLE.to_be_bytes());
        out.extend((vars.len() as u32).to_be_bytes());
        for (var, begin) in vars.iter().zip(begins) {
            put_name(&mut out, var.name);
            out.extend((var.dimids.len() as u32).to_be_bytes());
            for id in &var.dimids {
                out.extend(id.to_be_bytes());
            }
            if let Some(fill) = var.fill {
                out.extend(NC_ATTRIBUTE.to_be_bytes());
                out.extend(1u32.to_be_bytes());
                put_name(&mut out, "_FillValue");
                out.extend(var.nc_type.to_be_bytes());
                out.extend(1u32.to_be_bytes());
                encode_value(&mut out, var.nc_type, fill);
                pad4(&mut out);
            } else {
                out.extend(0u32.to_be_bytes());
                out.extend(0u32.to_be_bytes());
            }
            out.extend(var.nc_type.to_be_bytes());
            out.extend(vsize(var, dims).to_be_bytes());
            out.extend(begin.to_be_bytes());
        }
        out
    }

    /// Build a complete classic file: fixed variables first, then the
    /// interleaved record slab.
    fn build_classic(dims: &[(&str, u32)], vars: &[TestVar], numrecs: u32) -> Vec<u8> {
        let header_len = emit_header(dims, vars, &vec![0; vars.len()], numrecs).len() as u32;

        let is_record =
            |v: &TestVar| v.dimids.first().map(|&d| dims[d as usize].1 == 0) == Some(true);

        let mut begins = vec![0u32; vars.len()];
        let mut offset = header_len;
        for (i, var) in vars.iter().enumerate() {
            if !is_record(var) {
                begins[i] = offset;
                offset += vsize(var, dims);
            }
        }
        let record_start = offset;
        let mut within_record = 0u32;
        for (i, var) in vars.iter().enumerate() {
            if is_record(var) {
                begins[i] = record_start + within_record;
                within_record += vsize(var, dims);
            }
        }

        let mut out = emit_header(dims, vars, &begins, numrecs);
        for var in vars.iter().filter(|v| !is_record(v)) {
            let before = out.len();
            for &value in &var.data {
                encode_value(&mut out, var.nc_type, value);
            }
            assert_eq!(out.len() - before, fixed_count(var, dims) * type_size(var.nc_type).unwrap());
            pad4(&mut out);
        }
        let per_record: Vec<usize> = vars.iter().map(|v| fixed_count(v, dims)).collect();
        for r in 0..numrecs as usize {
            for (var, &count) in vars.iter().zip(&per_record) {
                if !is_record(var) {
                    continue;
                }
                for &value in &var.data[r * count..(r + 1) * count] {
                    encode_value(&mut out, var.nc_type, value);
                }
                pad4(&mut out);
            }
        }
        out
    }

    fn key() -> EntryKey {
        EntryKey {
            region: Region::Atlantic,
            year: 2020,
            platform_id: "4900562".to_string(),
            cycle_number: 12,
        }
    }

    /// Two profiles, three levels, padding at (1, 2)
    fn two_profile_file(with_psal: bool) -> Vec<u8> {
        let dims = [("N_PROF", 2u32), ("N_LEVELS", 3u32)];
        let mut vars = vec![
            dvar("JULD", vec![0], vec![18262.5, 18263.0]),
            dvar("LATITUDE", vec![0], vec![12.25, 13.5]),
            dvar("LONGITUDE", vec![0], vec![-38.0, -39.5]),
            fvar("PRES", vec![0, 1], vec![5.0, 10.0, 20.0, 5.0, 10.0, F_FILL]),
            fvar("TEMP", vec![0, 1], vec![21.5, 20.0, 18.5, 22.0, F_FILL, F_FILL]),
        ];
        if with_psal {
            vars.push(fvar(
                "PSAL",
                vec![0, 1],
                vec![35.1, 35.2, F_FILL, 35.0, 34.9, F_FILL],
            ));
        }
        build_classic(&dims, &vars, 0)
    }

    #[test]
    fn test_decode_two_profiles_with_padding() {
        let bytes = two_profile_file(true);
        let decoded = decode_profile_bytes(&bytes, &key()).unwrap();

        assert!(!decoded.missing_salinity);
        // Padding at (1, 2) drops one level from the second profile
        assert_eq!(decoded.rows.len(), 5);

        let first = &decoded.rows[0];
        assert_eq!(first.platform_id, "4900562");
        assert_eq!(first.cycle_number, 12);
        assert_eq!(first.level, 0);
        assert_eq!(first.juld.to_rfc3339(), "2000-01-01T12:00:00+00:00");
        assert!((first.latitude - 12.25).abs() < 1e-9);
        assert!((first.longitude + 38.0).abs() < 1e-9);
        assert!((first.pressure_dbar - 5.0).abs() < 1e-6);
        assert!((first.temperature_c - 21.5).abs() < 1e-6);
        assert_eq!(first.salinity_psu, Some(35.1));
        assert_eq!(first.region, Region::Atlantic);

        // Fill salinity at (0, 2) stays absent
        assert_eq!(decoded.rows[2].salinity_psu, None);
        // Fill temperature at a real pressure level decodes to NaN
        let second_profile_l1 = &decoded.rows[4];
        assert_eq!(second_profile_l1.level, 1);
        assert!(second_profile_l1.temperature_c.is_nan());
    }

    #[test]
    fn test_missing_psal_flags_missing_salinity() {
        let bytes = two_profile_file(false);
        let decoded = decode_profile_bytes(&bytes, &key()).unwrap();
        assert!(decoded.missing_salinity);
        assert!(decoded.rows.iter().all(|r| r.salinity_psu.is_none()));
    }

    #[test]
    fn test_fill_juld_drops_profile() {
        let dims = [("N_PROF", 2u32), ("N_LEVELS", 1u32)];
        let vars = vec![
            dvar("JULD", vec![0], vec![J_FILL, 18263.0]),
            dvar("LATITUDE", vec![0], vec![1.0, 2.0]),
            dvar("LONGITUDE", vec![0], vec![3.0, 4.0]),
            fvar("PRES", vec![0, 1], vec![5.0, 6.0]),
            fvar("TEMP", vec![0, 1], vec![20.0, 21.0]),
        ];
        let bytes = build_classic(&dims, &vars, 0);
        let decoded = decode_profile_bytes(&bytes, &key()).unwrap();
        assert_eq!(decoded.rows.len(), 1);
        assert!((decoded.rows[0].pressure_dbar - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let dims = [("N_LEVELS", 2u32)];
        let vars = vec![
            dvar("juld", vec![], vec![18262.0]),
            dvar("Latitude", vec![], vec![1.0]),
            dvar("LONGITUDE", vec![], vec![2.0]),
            fvar("pres", vec![0], vec![5.0, 10.0]),
            fvar("Temp", vec![0], vec![20.0, 19.0]),
        ];
        let bytes = build_classic(&dims, &vars, 0);
        let decoded = decode_profile_bytes(&bytes, &key()).unwrap();
        assert_eq!(decoded.rows.len(), 2);
        assert_eq!(decoded.rows[1].level, 1);
    }

    #[test]
    fn test_truncated_file_is_error() {
        let bytes = two_profile_file(true);
        let err = decode_profile_bytes(&bytes[..bytes.len() - 10], &key()).unwrap_err();
        assert!(err.contains("end of file") || err.contains("truncated"), "{}", err);
    }

    #[test]
    fn test_bad_magic_is_error() {
        let err = decode_profile_bytes(b"\x89HDF\r\n\x1a\n0000", &key()).unwrap_err();
        assert!(err.contains("magic"), "{}", err);
    }

    #[test]
    fn test_missing_required_variable_is_error() {
        let dims = [("N_LEVELS", 1u32)];
        let vars = vec![
            dvar("JULD", vec![], vec![18262.0]),
            fvar("PRES", vec![0], vec![5.0]),
        ];
        let bytes = build_classic(&dims, &vars, 0);
        let err = decode_profile_bytes(&bytes, &key()).unwrap_err();
        assert!(err.contains("latitude"), "{}", err);
    }

    #[test]
    fn test_record_variables_interleave() {
        // Record dimension with three records and two record variables
        let dims = [("N_PROF", 0u32), ("N_LEVELS", 2u32)];
        let vars = vec![
            dvar("JULD", vec![0], vec![18262.0, 18263.0, 18264.0]),
            dvar("LATITUDE", vec![0], vec![1.0, 2.0, 3.0]),
            dvar("LONGITUDE", vec![0], vec![4.0, 5.0, 6.0]),
            fvar(
                "PRES",
                vec![0, 1],
                vec![5.0, 10.0, 6.0, 11.0, 7.0, 12.0],
            ),
            fvar(
                "TEMP",
                vec![0, 1],
                vec![20.0, 19.0, 21.0, 18.0, 22.0, 17.0],
            ),
        ];
        let bytes = build_classic(&dims, &vars, 3);
        let decoded = decode_profile_bytes(&bytes, &key()).unwrap();
        assert_eq!(decoded.rows.len(), 6);
        assert!((decoded.rows[5].pressure_dbar - 12.0).abs() < 1e-6);
        assert!((decoded.rows[5].temperature_c - 17.0).abs() < 1e-6);
        assert_eq!(decoded.rows[4].juld.to_rfc3339(), "2000-01-03T00:00:00+00:00");
    }

    #[test]
    fn test_default_fill_applies_when_undeclared() {
        let dims = [("N_LEVELS", 2u32)];
        let mut pres = fvar("PRES", vec![0], vec![5.0, FILL_FLOAT]);
        pres.fill = None;
        let vars = vec![
            dvar("JULD", vec![], vec![18262.0]),
            dvar("LATITUDE", vec![], vec![1.0]),
            dvar("LONGITUDE", vec![], vec![2.0]),
            pres,
            fvar("TEMP", vec![0], vec![20.0, 19.0]),
        ];
        let bytes = build_classic(&dims, &vars, 0);
        let decoded = decode_profile_bytes(&bytes, &key()).unwrap();
        assert_eq!(decoded.rows.len(), 1);
    }
}
