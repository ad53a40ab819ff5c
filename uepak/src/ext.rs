use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::Error;

/// Typed reads over the pak binary format, layered on any [`std::io::Read`].
pub trait ReadExt {
    fn read_bool(&mut self) -> Result<bool, Error>;
    /// 16-byte encryption-key GUID slot (see footer Open Question).
    fn read_guid(&mut self) -> Result<[u8; 16], Error>;
    /// 20-byte SHA-1 digest slot.
    fn read_hash(&mut self) -> Result<[u8; 20], Error>;
    fn read_array<T>(
        &mut self,
        func: impl FnMut(&mut Self) -> Result<T, Error>,
    ) -> Result<Vec<T>, Error>;
    /// Signed length-prefixed ASCII/UTF-16LE string; see the Binary I/O
    /// string contract.
    fn read_string(&mut self) -> Result<String, Error>;
    fn read_len(&mut self, len: usize) -> Result<Vec<u8>, Error>;
}

/// Typed writes over the pak binary format, layered on any [`std::io::Write`].
pub trait WriteExt {
    fn write_bool(&mut self, value: bool) -> Result<(), Error>;
    fn write_guid(&mut self, value: [u8; 16]) -> Result<(), Error>;
    fn write_hash(&mut self, value: [u8; 20]) -> Result<(), Error>;
    /// Emits ASCII with a positive length (NUL-inclusive) when the value is
    /// pure ASCII, else UTF-16LE with a negative length (NUL-inclusive, in
    /// code units).
    fn write_string(&mut self, value: &str) -> Result<(), Error>;
}

impl<R: std::io::Read + ?Sized> ReadExt for R {
    fn read_bool(&mut self) -> Result<bool, Error> {
        match self.read_u8()? {
            1 => Ok(true),
            0 => Ok(false),
            _ => Err(Error::CorruptEntry("boolean byte is not 0 or 1")),
        }
    }

    fn read_guid(&mut self) -> Result<[u8; 16], Error> {
        let mut guid = [0; 16];
        self.read_exact(&mut guid)?;
        Ok(guid)
    }

    fn read_hash(&mut self) -> Result<[u8; 20], Error> {
        let mut hash = [0; 20];
        self.read_exact(&mut hash)?;
        Ok(hash)
    }

    fn read_array<T>(
        &mut self,
        mut func: impl FnMut(&mut Self) -> Result<T, Error>,
    ) -> Result<Vec<T>, Error> {
        let count = self.read_u32::<LE>()?;
        let mut out = Vec::with_capacity(count.min(1 << 20) as usize);
        for _ in 0..count {
            out.push(func(self)?);
        }
        Ok(out)
    }

    fn read_string(&mut self) -> Result<String, Error> {
        let len = self.read_i32::<LE>()?;
        let mut s = match len.cmp(&0) {
            std::cmp::Ordering::Equal => return Ok(String::new()),
            std::cmp::Ordering::Less => {
                let units_len = (-len) as usize;
                let mut units = Vec::with_capacity(units_len);
                for _ in 0..units_len {
                    units.push(self.read_u16::<LE>()?);
                }
                String::from_utf16(&units)?
            }
            std::cmp::Ordering::Greater => String::from_utf8(self.read_len(len as usize)?)?,
        };
        s.pop(); // strip the NUL terminator
        Ok(s)
    }

    fn read_len(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl<W: std::io::Write + ?Sized> WriteExt for W {
    fn write_bool(&mut self, value: bool) -> Result<(), Error> {
        self.write_u8(value as u8)?;
        Ok(())
    }

    fn write_guid(&mut self, value: [u8; 16]) -> Result<(), Error> {
        self.write_all(&value)?;
        Ok(())
    }

    fn write_hash(&mut self, value: [u8; 20]) -> Result<(), Error> {
        self.write_all(&value)?;
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> Result<(), Error> {
        if value.is_ascii() {
            let bytes = value.as_bytes();
            self.write_i32::<LE>(bytes.len() as i32 + 1)?;
            self.write_all(bytes)?;
            self.write_u8(0)?;
        } else {
            let units: Vec<u16> = value.encode_utf16().collect();
            self.write_i32::<LE>(-(units.len() as i32 + 1))?;
            for unit in units {
                self.write_u16::<LE>(unit)?;
            }
            self.write_u16::<LE>(0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn ascii_string_round_trips() {
        let mut buf = Vec::new();
        buf.write_string("hello").unwrap();
        let mut cur = Cursor::new(buf);
        assert_eq!(cur.read_string().unwrap(), "hello");
    }

    #[test]
    fn empty_string_round_trips() {
        let mut buf = Vec::new();
        buf.write_string("").unwrap();
        let mut cur = Cursor::new(buf);
        assert_eq!(cur.read_string().unwrap(), "");
    }

    #[test]
    fn non_ascii_string_round_trips_as_utf16le() {
        let mut buf = Vec::new();
        buf.write_string("héllo").unwrap();
        let mut cur = Cursor::new(buf.clone());
        let len = cur.read_i32::<LE>().unwrap();
        assert!(len < 0, "non-ascii string must use a negative length prefix");
        let mut cur = Cursor::new(buf);
        assert_eq!(cur.read_string().unwrap(), "héllo");
    }
}
