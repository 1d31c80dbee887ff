use crate::error::{EngineError, EngineResult};
use crate::file::PageId;

/// Little-endian writer over a page buffer
pub struct ByteWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
    page_id: PageId,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buffer: &'a mut [u8], position: usize, page_id: PageId) -> Self {
        Self {
            buffer,
            position,
            page_id,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> EngineResult<()> {
        let end = self.position + bytes.len();
        if end > self.buffer.len() {
            return Err(EngineError::corruption(
                self.page_id,
                format!("page overflow writing {} bytes at {}", bytes.len(), self.position),
            ));
        }
        self.buffer[self.position..end].copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> EngineResult<()> {
        self.put_bytes(&[value])
    }

    pub fn put_u16(&mut self, value: u16) -> EngineResult<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_u32(&mut self, value: u32) -> EngineResult<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_u64(&mut self, value: u64) -> EngineResult<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_i64(&mut self, value: i64) -> EngineResult<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_f64(&mut self, value: f64) -> EngineResult<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// String prefixed with a one-byte length
    pub fn put_short_str(&mut self, value: &str) -> EngineResult<()> {
        let len = u8::try_from(value.len()).map_err(|_| {
            EngineError::InvalidName(format!("'{}' is longer than 255 bytes", value))
        })?;
        self.put_u8(len)?;
        self.put_bytes(value.as_bytes())
    }
}

/// Little-endian reader over a page buffer
pub struct ByteReader<'a> {
    buffer: &'a [u8],
    position: usize,
    page_id: PageId,
}

impl<'a> ByteReader<'a> {
    pub fn new(buffer: &'a [u8], position: usize, page_id: PageId) -> Self {
        Self {
            buffer,
            position,
            page_id,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn get_bytes(&mut self, len: usize) -> EngineResult<&'a [u8]> {
        let end = self.position + len;
        if end > self.buffer.len() {
            return Err(EngineError::corruption(
                self.page_id,
                format!("read of {} bytes at {} runs past the page", len, self.position),
            ));
        }
        let bytes = &self.buffer[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn get_array<const N: usize>(&mut self) -> EngineResult<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.get_bytes(N)?);
        Ok(array)
    }

    pub fn get_u8(&mut self) -> EngineResult<u8> {
        Ok(self.get_array::<1>()?[0])
    }

    pub fn get_u16(&mut self) -> EngineResult<u16> {
        Ok(u16::from_le_bytes(self.get_array()?))
    }

    pub fn get_u32(&mut self) -> EngineResult<u32> {
        Ok(u32::from_le_bytes(self.get_array()?))
    }

    pub fn get_u64(&mut self) -> EngineResult<u64> {
        Ok(u64::from_le_bytes(self.get_array()?))
    }

    pub fn get_i64(&mut self) -> EngineResult<i64> {
        Ok(i64::from_le_bytes(self.get_array()?))
    }

    pub fn get_f64(&mut self) -> EngineResult<f64> {
        Ok(f64::from_le_bytes(self.get_array()?))
    }

    pub fn get_str(&mut self, len: usize) -> EngineResult<String> {
        let page_id = self.page_id;
        let bytes = self.get_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| EngineError::corruption(page_id, "invalid UTF-8 string"))
    }

    pub fn get_short_str(&mut self) -> EngineResult<String> {
        let len = self.get_u8()? as usize;
        self.get_str(len)
    }
}
