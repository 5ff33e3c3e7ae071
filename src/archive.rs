use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io;
use std::mem;
use std::sync::Arc;

use crate::error::{Error, Result};

/// A growable byte buffer with a read cursor. Values are appended at the end
/// and consumed from the front; bytes in `[0, cursor)` have already been
/// read, bytes in `[cursor, len)` are still pending.
///
/// Encodings are host-endian and native-width, so both ends of a stream must
/// run on matching platforms.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    buffer: Vec<u8>,
    current: usize,
}

impl Archive {
    #[inline]
    pub fn new() -> Archive {
        Archive {
            buffer: Vec::new(),
            current: 0,
        }
    }

    /// Creates an empty archive with `size` bytes of pre-allocated capacity.
    #[inline]
    pub fn with_capacity(size: usize) -> Archive {
        Archive {
            buffer: Vec::with_capacity(size),
            current: 0,
        }
    }

    /// Total number of bytes held, consumed or not.
    #[inline]
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Number of bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.current
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Appends the wire encoding of `value`.
    #[inline]
    pub fn append<T: Archivable>(&mut self, value: &T) {
        value.pack_into(self)
    }

    /// Consumes the bytes encoding a `T` at the cursor into `value`.
    #[inline]
    pub fn extract<T: Archivable>(&mut self, value: &mut T) -> Result<()> {
        value.unpack_from(self)
    }

    /// Appends one or more values. Tuples are encoded field by field, in
    /// declaration order.
    #[inline]
    pub fn pack<T: Archivable>(&mut self, values: &T) {
        self.append(values)
    }

    /// Extracts a value seeded from its default. The inverse of `pack` under
    /// an identical type sequence.
    #[inline]
    pub fn unpack<T: Archivable + Default>(&mut self) -> Result<T> {
        let mut value = T::default();
        self.extract(&mut value)?;
        Ok(value)
    }

    /// Unpacks every element of a tuple in declaration order.
    #[inline]
    pub fn transform<T: Archivable>(&mut self, values: &mut T) -> Result<()> {
        self.extract(values)
    }

    /// Appends the unread remainder of `other`. The source cursor is left
    /// untouched.
    #[inline]
    pub fn append_archive(&mut self, other: &Archive) {
        self.buffer.extend_from_slice(&other.buffer[other.current..]);
    }

    /// Appends this archive's unread remainder into `target`.
    #[inline]
    pub fn extract_archive(&self, target: &mut Archive) {
        target.append_archive(self);
    }

    #[inline]
    fn save(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Reads one value off the unread region, advancing the cursor by
    /// exactly the number of bytes consumed.
    fn load<T, F>(&mut self, read: F) -> Result<T>
    where
        F: FnOnce(&mut &[u8]) -> io::Result<T>,
    {
        let mut slice = &self.buffer[self.current..];
        let before = slice.len();
        let value = read(&mut slice).map_err(|_| Error::ShortRead)?;
        self.current += before - slice.len();
        Ok(value)
    }

    fn load_bytes(&mut self, size: usize) -> Result<Vec<u8>> {
        if size > self.remaining() {
            return Err(Error::ShortRead);
        }

        let start = self.current;
        self.current += size;
        Ok(self.buffer[start..self.current].to_vec())
    }
}

impl From<Vec<u8>> for Archive {
    #[inline]
    fn from(buffer: Vec<u8>) -> Archive {
        Archive { buffer, current: 0 }
    }
}

/// A value type with reciprocal pack/unpack operations. For any sequence of
/// archivable values, packing and then unpacking under the same type
/// sequence yields equal values in the same order.
pub trait Archivable {
    fn pack_into(&self, archive: &mut Archive);
    fn unpack_from(&mut self, archive: &mut Archive) -> Result<()>;
}

impl Archivable for u8 {
    #[inline]
    fn pack_into(&self, archive: &mut Archive) {
        archive.save(&[*self]);
    }

    #[inline]
    fn unpack_from(&mut self, archive: &mut Archive) -> Result<()> {
        *self = archive.load(|slice| slice.read_u8())?;
        Ok(())
    }
}

impl Archivable for i8 {
    #[inline]
    fn pack_into(&self, archive: &mut Archive) {
        archive.save(&[*self as u8]);
    }

    #[inline]
    fn unpack_from(&mut self, archive: &mut Archive) -> Result<()> {
        *self = archive.load(|slice| slice.read_i8())?;
        Ok(())
    }
}

macro_rules! impl_archivable_scalar {
    ($($ty:ty, $write:ident, $read:ident;)*) => {$(
        impl Archivable for $ty {
            #[inline]
            fn pack_into(&self, archive: &mut Archive) {
                archive
                    .buffer
                    .$write::<NativeEndian>(*self)
                    .expect("Error appending to archive buffer");
            }

            #[inline]
            fn unpack_from(&mut self, archive: &mut Archive) -> Result<()> {
                *self = archive.load(|slice| slice.$read::<NativeEndian>())?;
                Ok(())
            }
        }
    )*};
}

impl_archivable_scalar! {
    u16, write_u16, read_u16;
    u32, write_u32, read_u32;
    u64, write_u64, read_u64;
    u128, write_u128, read_u128;
    i16, write_i16, read_i16;
    i32, write_i32, read_i32;
    i64, write_i64, read_i64;
    i128, write_i128, read_i128;
    f32, write_f32, read_f32;
    f64, write_f64, read_f64;
}

impl Archivable for usize {
    #[inline]
    fn pack_into(&self, archive: &mut Archive) {
        archive
            .buffer
            .write_uint::<NativeEndian>(*self as u64, mem::size_of::<usize>())
            .expect("Error appending to archive buffer");
    }

    #[inline]
    fn unpack_from(&mut self, archive: &mut Archive) -> Result<()> {
        *self = archive.load(|slice| slice.read_uint::<NativeEndian>(mem::size_of::<usize>()))? as usize;
        Ok(())
    }
}

impl Archivable for isize {
    #[inline]
    fn pack_into(&self, archive: &mut Archive) {
        archive
            .buffer
            .write_int::<NativeEndian>(*self as i64, mem::size_of::<isize>())
            .expect("Error appending to archive buffer");
    }

    #[inline]
    fn unpack_from(&mut self, archive: &mut Archive) -> Result<()> {
        *self = archive.load(|slice| slice.read_int::<NativeEndian>(mem::size_of::<isize>()))? as isize;
        Ok(())
    }
}

impl Archivable for bool {
    #[inline]
    fn pack_into(&self, archive: &mut Archive) {
        archive.save(&[*self as u8]);
    }

    #[inline]
    fn unpack_from(&mut self, archive: &mut Archive) -> Result<()> {
        *self = archive.load(|slice| slice.read_u8())? != 0;
        Ok(())
    }
}

impl Archivable for char {
    #[inline]
    fn pack_into(&self, archive: &mut Archive) {
        (*self as u32).pack_into(archive);
    }

    #[inline]
    fn unpack_from(&mut self, archive: &mut Archive) -> Result<()> {
        let mut scalar = 0u32;
        scalar.unpack_from(archive)?;
        *self = std::char::from_u32(scalar).ok_or(Error::BadEncoding)?;
        Ok(())
    }
}

impl Archivable for String {
    /// Length prefix in `size_t` width, followed by the payload bytes.
    #[inline]
    fn pack_into(&self, archive: &mut Archive) {
        self.len().pack_into(archive);
        archive.save(self.as_bytes());
    }

    #[inline]
    fn unpack_from(&mut self, archive: &mut Archive) -> Result<()> {
        let mut size = 0usize;
        size.unpack_from(archive)?;

        let bytes = archive.load_bytes(size)?;
        *self = String::from_utf8(bytes).map_err(|_| Error::BadEncoding)?;
        Ok(())
    }
}

impl<T: Archivable> Archivable for Box<T> {
    #[inline]
    fn pack_into(&self, archive: &mut Archive) {
        (**self).pack_into(archive);
    }

    #[inline]
    fn unpack_from(&mut self, archive: &mut Archive) -> Result<()> {
        (**self).unpack_from(archive)
    }
}

impl<T: Archivable + Default> Archivable for Arc<T> {
    #[inline]
    fn pack_into(&self, archive: &mut Archive) {
        (**self).pack_into(archive);
    }

    /// The pointee may be shared, so unpacking allocates a fresh one and
    /// swings the handle over to it.
    #[inline]
    fn unpack_from(&mut self, archive: &mut Archive) -> Result<()> {
        let mut value = T::default();
        value.unpack_from(archive)?;
        *self = Arc::new(value);
        Ok(())
    }
}

impl Archivable for Archive {
    #[inline]
    fn pack_into(&self, archive: &mut Archive) {
        archive.append_archive(self);
    }

    #[inline]
    fn unpack_from(&mut self, archive: &mut Archive) -> Result<()> {
        archive.extract_archive(self);
        Ok(())
    }
}

macro_rules! impl_archivable_tuple {
    ($($field:tt $ty:ident),*) => {
        impl<$($ty: Archivable),*> Archivable for ($($ty,)*) {
            #[inline]
            #[allow(unused_variables)]
            fn pack_into(&self, archive: &mut Archive) {
                $(self.$field.pack_into(archive);)*
            }

            #[inline]
            #[allow(unused_variables)]
            fn unpack_from(&mut self, archive: &mut Archive) -> Result<()> {
                $(self.$field.unpack_from(archive)?;)*
                Ok(())
            }
        }
    };
}

impl_archivable_tuple!();
impl_archivable_tuple!(0 A);
impl_archivable_tuple!(0 A, 1 B);
impl_archivable_tuple!(0 A, 1 B, 2 C);
impl_archivable_tuple!(0 A, 1 B, 2 C, 3 D);
impl_archivable_tuple!(0 A, 1 B, 2 C, 3 D, 4 E);
impl_archivable_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_archivable_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_archivable_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_boundaries() {
        let mut archive = Archive::new();
        archive.pack(&(i32::min_value(), i32::max_value()));

        let (low, high): (i32, i32) = archive.unpack().unwrap();

        assert_eq!(low, i32::min_value());
        assert_eq!(high, i32::max_value());
    }

    #[test]
    fn test_long_long_boundaries() {
        let mut archive = Archive::new();
        archive.pack(&(i64::min_value(), i64::max_value()));

        let (low, high): (i64, i64) = archive.unpack().unwrap();

        assert_eq!(low, i64::min_value());
        assert_eq!(high, i64::max_value());
    }

    #[test]
    fn test_float_boundaries() {
        let mut archive = Archive::new();
        archive.pack(&(std::f32::MIN, std::f32::MAX, std::f64::MIN, std::f64::MAX));

        let (f_low, f_high, d_low, d_high): (f32, f32, f64, f64) = archive.unpack().unwrap();

        assert_eq!(f_low, std::f32::MIN);
        assert_eq!(f_high, std::f32::MAX);
        assert_eq!(d_low, std::f64::MIN);
        assert_eq!(d_high, std::f64::MAX);
    }

    #[test]
    fn test_bool_and_char() {
        let mut archive = Archive::new();
        archive.pack(&(true, false, 'a', 'Z'));

        let (yes, no, lower, upper): (bool, bool, char, char) = archive.unpack().unwrap();

        assert_eq!(yes, true);
        assert_eq!(no, false);
        assert_eq!(lower, 'a');
        assert_eq!(upper, 'Z');
    }

    #[test]
    fn test_string_roundtrip() {
        let input = "Archive string test".to_string();

        let mut archive = Archive::new();
        archive.append(&input);

        let output: String = archive.unpack().unwrap();

        assert_eq!(output, input);
        assert_eq!(archive.remaining(), 0);
    }

    #[test]
    fn test_empty_string() {
        let mut archive = Archive::new();
        archive.append(&String::new());

        assert_eq!(archive.size(), mem::size_of::<usize>());

        let output: String = archive.unpack().unwrap();

        assert_eq!(output, "");
    }

    #[derive(Debug, Default, Eq, PartialEq)]
    struct Record {
        a: i32,
        b: bool,
        c: String,
    }

    impl Archivable for Record {
        fn pack_into(&self, archive: &mut Archive) {
            archive.pack(&self.a);
            archive.pack(&self.b);
            archive.pack(&self.c);
        }

        fn unpack_from(&mut self, archive: &mut Archive) -> Result<()> {
            archive.extract(&mut self.a)?;
            archive.extract(&mut self.b)?;
            archive.extract(&mut self.c)
        }
    }

    #[test]
    fn test_user_defined_object() {
        let input = Record {
            a: 100,
            b: false,
            c: "archival string".to_string(),
        };

        let mut archive = Archive::new();
        archive.append(&input);

        let output: Record = archive.unpack().unwrap();

        assert_eq!(output, input);
    }

    #[test]
    fn test_boxed_value() {
        let input = Box::new(true);

        let mut archive = Archive::new();
        archive.append(&input);

        let output: Box<bool> = archive.unpack().unwrap();

        assert_eq!(*output, *input);
    }

    #[test]
    fn test_shared_value() {
        let input = Arc::new("Archive string test".to_string());

        let mut archive = Archive::new();
        archive.append(&input);

        // The receiving handle shares its pointee; unpacking must not write
        // through the alias.
        let mut output = Arc::new(String::new());
        let alias = Arc::clone(&output);
        archive.extract(&mut output).unwrap();

        assert_eq!(*output, *input);
        assert_eq!(*alias, "");
    }

    #[test]
    fn test_archive_in_archive() {
        let mut first = Archive::new();
        let mut second = Archive::new();
        let mut third = Archive::new();

        first.append(&"s1".to_string());
        second.append(&"s2".to_string());
        third.append(&"s3".to_string());

        first.append_archive(&second);
        first.extract_archive(&mut third);

        let (a, b, c): (String, String, String) = third.unpack().unwrap();

        assert_eq!(a, "s3");
        assert_eq!(b, "s1");
        assert_eq!(c, "s2");
    }

    #[test]
    fn test_pack_order_is_unpack_order() {
        let mut archive = Archive::new();
        archive.pack(&(7u64, "mid".to_string(), -3i16));

        let mut output = (0u64, String::new(), 0i16);
        archive.transform(&mut output).unwrap();

        assert_eq!(output.0, 7);
        assert_eq!(output.1, "mid");
        assert_eq!(output.2, -3);
    }

    #[test]
    fn test_cursor_accounting() {
        let mut archive = Archive::new();
        archive.pack(&(1u32, 2u64));

        assert_eq!(archive.size(), 12);
        assert_eq!(archive.remaining(), 12);

        let _: u32 = archive.unpack().unwrap();
        assert_eq!(archive.remaining(), 8);

        let _: u64 = archive.unpack().unwrap();
        assert_eq!(archive.remaining(), 0);
    }

    #[test]
    fn test_short_read() {
        let mut archive = Archive::new();
        archive.append(&1u16);

        let result: Result<u64> = archive.unpack();

        assert_eq!(result.unwrap_err(), Error::ShortRead);
    }

    #[test]
    fn test_string_length_past_end() {
        // A length prefix larger than the remaining payload must fail before
        // any allocation of the bogus size.
        let mut archive = Archive::new();
        archive.append(&usize::max_value());

        let result: Result<String> = archive.unpack();

        assert_eq!(result.unwrap_err(), Error::ShortRead);
    }
}
