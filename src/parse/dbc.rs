//! Client database (DBC) table parser.
//!
//! A DBC is `WDBC` + record/field counts, fixed-size u32 records and a
//! trailing string block. Cells are read either as integers, floats, or
//! as offsets into the string block.

use super::cursor::Cursor;
use crate::error::ParseError;

#[derive(Debug, Clone)]
pub struct Table {
    record_count: usize,
    field_count: usize,
    records: Vec<u32>,
    string_block: Vec<u8>,
}

impl Table {
    pub fn rows(&self) -> usize {
        self.record_count
    }

    pub fn fields(&self) -> usize {
        self.field_count
    }

    pub fn u32(&self, row: usize, field: usize) -> Option<u32> {
        if row >= self.record_count || field >= self.field_count {
            return None;
        }
        self.records.get(row * self.field_count + field).copied()
    }

    pub fn i32(&self, row: usize, field: usize) -> Option<i32> {
        self.u32(row, field).map(|v| v as i32)
    }

    pub fn f32(&self, row: usize, field: usize) -> Option<f32> {
        self.u32(row, field).map(f32::from_bits)
    }

    /// Resolve a string-offset column.
    pub fn string(&self, row: usize, field: usize) -> Option<&str> {
        let offset = self.u32(row, field)? as usize;
        if offset >= self.string_block.len() {
            return None;
        }
        let rest = &self.string_block[offset..];
        let end = rest.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&rest[..end]).ok()
    }

    /// Find the row whose first column equals `id`.
    pub fn row_by_id(&self, id: u32) -> Option<usize> {
        (0..self.record_count).find(|&row| self.u32(row, 0) == Some(id))
    }
}

pub fn parse_table(bytes: &[u8]) -> Result<Table, ParseError> {
    let mut c = Cursor::new(bytes);
    let magic = c.tag()?;
    if &magic != b"WDBC" {
        return Err(ParseError::BadMagic {
            expected: "WDBC".into(),
            found: String::from_utf8_lossy(&magic).into_owned(),
        });
    }
    let record_count = c.u32()? as usize;
    let field_count = c.u32()? as usize;
    let record_size = c.u32()? as usize;
    let string_size = c.u32()? as usize;

    if record_size != field_count * 4 {
        return Err(ParseError::BadCount {
            context: format!("record size {record_size} != {field_count} fields * 4"),
        });
    }
    let record_bytes = record_count
        .checked_mul(record_size)
        .ok_or(ParseError::BadCount {
            context: "record block overflows".into(),
        })?;
    let mut records = Vec::with_capacity(record_count * field_count);
    {
        let block = c.take(record_bytes)?;
        let mut r = Cursor::new(block);
        for _ in 0..record_count * field_count {
            records.push(r.u32()?);
        }
    }
    let string_block = c.take(string_size)?.to_vec();

    Ok(Table {
        record_count,
        field_count,
        records,
        string_block,
    })
}

#[cfg(test)]
pub mod test_util {
    /// Assemble a DBC from u32 rows and a string block.
    pub fn build_table(rows: &[Vec<u32>], strings: &[u8]) -> Vec<u8> {
        let fields = rows.first().map_or(0, Vec::len);
        let mut out = Vec::new();
        out.extend_from_slice(b"WDBC");
        out.extend_from_slice(&(rows.len() as u32).to_le_bytes());
        out.extend_from_slice(&(fields as u32).to_le_bytes());
        out.extend_from_slice(&(fields as u32 * 4).to_le_bytes());
        out.extend_from_slice(&(strings.len() as u32).to_le_bytes());
        for row in rows {
            for &cell in row {
                out.extend_from_slice(&cell.to_le_bytes());
            }
        }
        out.extend_from_slice(strings);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_ints_and_strings() {
        let strings = b"\0Elwynn Forest\0";
        let bytes = test_util::build_table(
            &[vec![12, 1, 1], vec![40, 0, 1]],
            strings,
        );
        let table = parse_table(&bytes).unwrap();
        assert_eq!(table.rows(), 2);
        assert_eq!(table.u32(0, 0), Some(12));
        assert_eq!(table.string(0, 1), Some("Elwynn Forest"));
        assert_eq!(table.row_by_id(40), Some(1));
        assert_eq!(table.u32(2, 0), None);
    }

    #[test]
    fn rejects_inconsistent_record_size() {
        let mut bytes = test_util::build_table(&[vec![1, 2]], b"\0");
        // Corrupt the record size field.
        bytes[12..16].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            parse_table(&bytes),
            Err(ParseError::BadCount { .. })
        ));
    }
}
