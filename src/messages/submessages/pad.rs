use speedy::{Context, Readable, Reader, Writable, Writer};

/// PAD submessage: alignment filler, no content, no effect on the
/// receiver.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Pad;

impl<'a, C: Context> Readable<'a, C> for Pad {
  fn read_from<R: Reader<'a, C>>(_reader: &mut R) -> Result<Self, C::Error> {
    Ok(Self)
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    0
  }
}

impl<C: Context> Writable<C> for Pad {
  fn write_to<T: ?Sized + Writer<C>>(&self, _writer: &mut T) -> Result<(), C::Error> {
    Ok(())
  }
}
