pub mod header;
pub mod protocol_version;
pub mod submessages;
pub mod vendor_id;

/// Generates round-trip tests for a wire type: serialize against known
/// little-endian and big-endian byte images, then deserialize back.
#[macro_export]
macro_rules! serialization_test {
  (type = $type:ty,
   { $($test_name:ident, $test_value:expr, le = $le:expr, be = $be:expr),+ $(,)? }) => {
    $(
      mod $test_name {
        use speedy::{Endianness, Readable, Writable};

        use super::*;

        #[test]
        fn serializes_correctly_little_endian() {
          let value: $type = $test_value;
          let expected: Vec<u8> = $le.to_vec();
          let actual = value
            .write_to_vec_with_ctx(Endianness::LittleEndian)
            .unwrap();
          assert_eq!(actual, expected);
        }

        #[test]
        fn serializes_correctly_big_endian() {
          let value: $type = $test_value;
          let expected: Vec<u8> = $be.to_vec();
          let actual = value.write_to_vec_with_ctx(Endianness::BigEndian).unwrap();
          assert_eq!(actual, expected);
        }

        #[test]
        fn deserializes_correctly_little_endian() {
          let expected: $type = $test_value;
          let bytes: Vec<u8> = $le.to_vec();
          let actual =
            <$type>::read_from_buffer_with_ctx(Endianness::LittleEndian, &bytes).unwrap();
          assert_eq!(actual, expected);
        }

        #[test]
        fn deserializes_correctly_big_endian() {
          let expected: $type = $test_value;
          let bytes: Vec<u8> = $be.to_vec();
          let actual = <$type>::read_from_buffer_with_ctx(Endianness::BigEndian, &bytes).unwrap();
          assert_eq!(actual, expected);
        }
      }
    )+
  };
}
