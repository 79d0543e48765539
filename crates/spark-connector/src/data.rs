//! 大端基础类型的流适配器。
//!
//! 字符串采用 `u16` 长度前缀加 UTF-8 字节的编码，与设备侧常见的数据流格式保持一致。

use std::io::{self, Read, Write};

/// 以大端序读取基础类型的输入适配器。
#[derive(Debug)]
pub struct DataInput<R> {
    inner: R,
}

macro_rules! read_be {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self) -> io::Result<$ty> {
                let mut raw = [0_u8; size_of::<$ty>()];
                self.inner.read_exact(&mut raw)?;
                Ok(<$ty>::from_be_bytes(raw))
            }
        )*
    };
}

macro_rules! write_be {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self, value: $ty) -> io::Result<()> {
                self.inner.write_all(&value.to_be_bytes())
            }
        )*
    };
}

impl<R: Read> DataInput<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    read_be! {
        read_u8 => u8,
        read_i8 => i8,
        read_u16 => u16,
        read_i16 => i16,
        read_i32 => i32,
        read_i64 => i64,
        read_f32 => f32,
        read_f64 => f64,
    }

    pub fn read_bool(&mut self) -> io::Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// 读满整个缓冲区；流提前结束时返回 `UnexpectedEof`。
    pub fn read_fully(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)
    }

    /// 读取 `u16` 长度前缀的 UTF-8 字符串。
    pub fn read_utf(&mut self) -> io::Result<String> {
        let len = usize::from(self.read_u16()?);
        let mut raw = vec![0_u8; len];
        self.inner.read_exact(&mut raw)?;
        String::from_utf8(raw).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// 跳过至多 `count` 字节，返回实际跳过的数量。
    pub fn skip_bytes(&mut self, count: u64) -> io::Result<u64> {
        io::copy(&mut (&mut self.inner).take(count), &mut io::sink())
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for DataInput<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// 以大端序写出基础类型的输出适配器。
#[derive(Debug)]
pub struct DataOutput<W> {
    inner: W,
}

impl<W: Write> DataOutput<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    write_be! {
        write_u8 => u8,
        write_i8 => i8,
        write_u16 => u16,
        write_i16 => i16,
        write_i32 => i32,
        write_i64 => i64,
        write_f32 => f32,
        write_f64 => f64,
    }

    pub fn write_bool(&mut self, value: bool) -> io::Result<()> {
        self.write_u8(u8::from(value))
    }

    /// 写出 `u16` 长度前缀的 UTF-8 字符串；编码超过 65535 字节时返回 `InvalidInput`。
    pub fn write_utf(&mut self, value: &str) -> io::Result<()> {
        let len = u16::try_from(value.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("encoded string of {} bytes exceeds 65535", value.len()),
            )
        })?;
        self.write_u16(len)?;
        self.inner.write_all(value.as_bytes())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for DataOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_big_endian() {
        let mut out = DataOutput::new(Vec::new());
        out.write_u16(0x0102).expect("write u16");
        out.write_i32(-2).expect("write i32");
        out.write_bool(true).expect("write bool");
        assert_eq!(
            out.into_inner(),
            vec![0x01, 0x02, 0xff, 0xff, 0xff, 0xfe, 0x01]
        );
    }

    #[test]
    fn utf_strings_carry_length_prefix() {
        let mut out = DataOutput::new(Vec::new());
        out.write_utf("héllo").expect("write utf");
        let encoded = out.into_inner();
        assert_eq!(&encoded[..2], &[0x00, 0x06]);

        let mut input = DataInput::new(encoded.as_slice());
        assert_eq!(input.read_utf().expect("read utf"), "héllo");
    }

    #[test]
    fn truncated_input_reports_unexpected_eof() {
        let mut input = DataInput::new(&[0x00_u8, 0x05, b'a'][..]);
        let err = input.read_utf().expect_err("truncated");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn oversized_strings_are_rejected() {
        let mut out = DataOutput::new(Vec::new());
        let huge = "x".repeat(70_000);
        assert_eq!(
            out.write_utf(&huge).expect_err("too long").kind(),
            io::ErrorKind::InvalidInput
        );
        assert!(out.get_ref().is_empty());
    }

    #[test]
    fn skip_bytes_stops_at_end_of_stream() {
        let mut input = DataInput::new(&[1_u8, 2, 3][..]);
        assert_eq!(input.skip_bytes(2).expect("skip"), 2);
        assert_eq!(input.read_u8().expect("read"), 3);
        assert_eq!(input.skip_bytes(10).expect("skip"), 0);
    }
}
