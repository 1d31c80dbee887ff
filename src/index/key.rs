use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::file::PageId;
use crate::page::{ByteReader, ByteWriter};

/// Largest encoded key an index accepts
pub const MAX_INDEX_KEY_LENGTH: usize = 512;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BINARY: u8 = 5;

/// Value of an indexed field
///
/// Ordering: numbers first (integers and doubles compare numerically), then
/// strings in byte order, then the remaining types by type: `Null`, `Bool`,
/// `Binary`. Equality follows the ordering, so `Int(1) == Double(1.0)`.
#[derive(Debug, Clone)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
}

impl IndexKey {
    /// Rank of the type group in the total order
    fn rank(&self) -> u8 {
        match self {
            IndexKey::Int(_) | IndexKey::Double(_) => 0,
            IndexKey::String(_) => 1,
            IndexKey::Null => 2,
            IndexKey::Bool(_) => 3,
            IndexKey::Binary(_) => 4,
        }
    }

    /// Key for `field` of a JSON document; a missing field indexes as `Null`
    pub fn from_field(document: &Value, field: &str) -> EngineResult<Self> {
        match document.get(field) {
            Some(value) => Self::from_value(value),
            None => Ok(IndexKey::Null),
        }
    }

    pub fn from_value(value: &Value) -> EngineResult<Self> {
        let key = match value {
            Value::Null => IndexKey::Null,
            Value::Bool(b) => IndexKey::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => IndexKey::Int(i),
                None => IndexKey::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => IndexKey::String(s.clone()),
            Value::Array(_) | Value::Object(_) => {
                return Err(EngineError::InvalidArgument(
                    "arrays and objects cannot be used as index keys".to_string(),
                ));
            }
        };
        key.check_size()?;
        Ok(key)
    }

    pub fn to_value(&self) -> Value {
        match self {
            IndexKey::Null => Value::Null,
            IndexKey::Bool(b) => Value::Bool(*b),
            IndexKey::Int(i) => Value::from(*i),
            IndexKey::Double(d) => Value::from(*d),
            IndexKey::String(s) => Value::String(s.clone()),
            IndexKey::Binary(bytes) => Value::from(bytes.clone()),
        }
    }

    pub fn encoded_len(&self) -> usize {
        1 + match self {
            IndexKey::Null => 0,
            IndexKey::Bool(_) => 1,
            IndexKey::Int(_) | IndexKey::Double(_) => 8,
            IndexKey::String(s) => 2 + s.len(),
            IndexKey::Binary(b) => 2 + b.len(),
        }
    }

    pub fn check_size(&self) -> EngineResult<()> {
        let size = self.encoded_len();
        if size > MAX_INDEX_KEY_LENGTH {
            return Err(EngineError::KeyTooLarge {
                size,
                limit: MAX_INDEX_KEY_LENGTH,
            });
        }
        Ok(())
    }

    pub fn write(&self, writer: &mut ByteWriter<'_>) -> EngineResult<()> {
        match self {
            IndexKey::Null => writer.put_u8(TAG_NULL),
            IndexKey::Bool(b) => {
                writer.put_u8(TAG_BOOL)?;
                writer.put_u8(*b as u8)
            }
            IndexKey::Int(i) => {
                writer.put_u8(TAG_INT)?;
                writer.put_i64(*i)
            }
            IndexKey::Double(d) => {
                writer.put_u8(TAG_DOUBLE)?;
                writer.put_f64(*d)
            }
            IndexKey::String(s) => {
                writer.put_u8(TAG_STRING)?;
                writer.put_u16(s.len() as u16)?;
                writer.put_bytes(s.as_bytes())
            }
            IndexKey::Binary(b) => {
                writer.put_u8(TAG_BINARY)?;
                writer.put_u16(b.len() as u16)?;
                writer.put_bytes(b)
            }
        }
    }

    pub fn read(reader: &mut ByteReader<'_>, page_id: PageId) -> EngineResult<Self> {
        let tag = reader.get_u8()?;
        let key = match tag {
            TAG_NULL => IndexKey::Null,
            TAG_BOOL => IndexKey::Bool(reader.get_u8()? != 0),
            TAG_INT => IndexKey::Int(reader.get_i64()?),
            TAG_DOUBLE => IndexKey::Double(reader.get_f64()?),
            TAG_STRING => {
                let len = reader.get_u16()? as usize;
                IndexKey::String(reader.get_str(len)?)
            }
            TAG_BINARY => {
                let len = reader.get_u16()? as usize;
                IndexKey::Binary(reader.get_bytes(len)?.to_vec())
            }
            other => {
                return Err(EngineError::corruption(
                    page_id,
                    format!("unknown index key tag {}", other),
                ));
            }
        };
        Ok(key)
    }

    /// Whether this is a string key beginning with `prefix`
    pub fn starts_with(&self, prefix: &str) -> bool {
        matches!(self, IndexKey::String(s) if s.starts_with(prefix))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        use IndexKey::*;

        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Int(a), Double(b)) => cmp_int_double(*a, *b),
            (Double(a), Int(b)) => cmp_int_double(*b, *a).reverse(),
            (Double(a), Double(b)) => cmp_doubles(*a, *b),
            (String(a), String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Bool(a), Bool(b)) => a.cmp(b),
            (Binary(a), Binary(b)) => a.cmp(b),
            (Null, Null) => Ordering::Equal,
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Exact comparison of an integer with a double; no rounding through `as f64`.
/// NaN sorts by its sign bit, past the infinities.
fn cmp_int_double(int: i64, double: f64) -> Ordering {
    // 2^63, the first double above i64::MAX
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;

    if double.is_nan() {
        return if double.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if double >= LIMIT {
        return Ordering::Less;
    }
    if double < -LIMIT {
        return Ordering::Greater;
    }

    let whole = double.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => whole.partial_cmp(&double).unwrap_or(Ordering::Equal),
        other => other,
    }
}

/// Numeric order, with `-0.0 == 0.0` so that both equal `Int(0)`
fn cmp_doubles(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Null => write!(f, "null"),
            IndexKey::Bool(b) => write!(f, "{}", b),
            IndexKey::Int(i) => write!(f, "{}", i),
            IndexKey::Double(d) => write!(f, "{}", d),
            IndexKey::String(s) => write!(f, "\"{}\"", s),
            IndexKey::Binary(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for IndexKey {
    fn from(value: i64) -> Self {
        IndexKey::Int(value)
    }
}

impl From<i32> for IndexKey {
    fn from(value: i32) -> Self {
        IndexKey::Int(i64::from(value))
    }
}

impl From<f64> for IndexKey {
    fn from(value: f64) -> Self {
        IndexKey::Double(value)
    }
}

impl From<bool> for IndexKey {
    fn from(value: bool) -> Self {
        IndexKey::Bool(value)
    }
}

impl From<&str> for IndexKey {
    fn from(value: &str) -> Self {
        IndexKey::String(value.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(value: String) -> Self {
        IndexKey::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_order() {
        let mut keys = vec![
            IndexKey::Binary(vec![1]),
            IndexKey::Bool(false),
            IndexKey::Null,
            IndexKey::from("a"),
            IndexKey::Double(2.5),
            IndexKey::Int(2),
        ];
        keys.sort();

        assert_eq!(
            keys,
            vec![
                IndexKey::Int(2),
                IndexKey::Double(2.5),
                IndexKey::from("a"),
                IndexKey::Null,
                IndexKey::Bool(false),
                IndexKey::Binary(vec![1]),
            ]
        );
    }

    #[test]
    fn test_numeric_comparison() {
        assert_eq!(IndexKey::Int(1), IndexKey::Double(1.0));
        assert!(IndexKey::Int(-3) < IndexKey::Double(-2.5));
        assert!(IndexKey::Double(10.5) > IndexKey::Int(10));
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let exact = 1i64 << 53;
        let a = IndexKey::Int(exact);
        let b = IndexKey::Int(exact + 1);
        let d = IndexKey::Double(exact as f64);

        assert_eq!(a, d);
        assert!(b > d);
        assert!(d < b);
        assert!(a < b);

        assert!(IndexKey::Int(i64::MAX) < IndexKey::Double(9.3e18));
        assert!(IndexKey::Int(i64::MIN) == IndexKey::Double(-9_223_372_036_854_775_808.0));
        assert!(IndexKey::Int(i64::MIN) > IndexKey::Double(f64::NEG_INFINITY));
        assert!(IndexKey::Int(-1) > IndexKey::Double(-1.5));
        assert!(IndexKey::Int(i64::MAX) < IndexKey::Double(f64::NAN));
        assert_eq!(IndexKey::Int(0), IndexKey::Double(-0.0));
        assert_eq!(IndexKey::Double(0.0), IndexKey::Double(-0.0));
    }

    #[test]
    fn test_from_field() {
        let doc = json!({ "name": "Ann", "age": 31, "score": 4.5 });
        assert_eq!(IndexKey::from_field(&doc, "name").unwrap(), IndexKey::from("Ann"));
        assert_eq!(IndexKey::from_field(&doc, "age").unwrap(), IndexKey::Int(31));
        assert_eq!(IndexKey::from_field(&doc, "score").unwrap(), IndexKey::Double(4.5));
        assert_eq!(IndexKey::from_field(&doc, "missing").unwrap(), IndexKey::Null);

        let nested = json!({ "tags": ["a"] });
        assert!(IndexKey::from_field(&nested, "tags").is_err());
    }

    #[test]
    fn test_key_too_large() {
        let doc = json!({ "text": "x".repeat(MAX_INDEX_KEY_LENGTH) });
        assert!(matches!(
            IndexKey::from_field(&doc, "text"),
            Err(EngineError::KeyTooLarge { .. })
        ));
    }

    #[test]
    fn test_encode_decode() {
        let keys = [
            IndexKey::Null,
            IndexKey::Bool(true),
            IndexKey::Int(-42),
            IndexKey::Double(3.25),
            IndexKey::from("hello"),
            IndexKey::Binary(vec![0, 1, 2]),
        ];

        let mut buffer = vec![0u8; 128];
        let mut writer = ByteWriter::new(&mut buffer, 0, 1);
        for key in &keys {
            key.write(&mut writer).unwrap();
        }
        let total: usize = keys.iter().map(IndexKey::encoded_len).sum();
        assert_eq!(writer.position(), total);

        let mut reader = ByteReader::new(&buffer, 0, 1);
        for key in &keys {
            let decoded = IndexKey::read(&mut reader, 1).unwrap();
            assert_eq!(&decoded, key);
            assert_eq!(decoded.rank(), key.rank());
        }
    }

    #[test]
    fn test_starts_with() {
        assert!(IndexKey::from("apple").starts_with("app"));
        assert!(!IndexKey::from("banana").starts_with("app"));
        assert!(!IndexKey::Int(1).starts_with(""));
    }
}
