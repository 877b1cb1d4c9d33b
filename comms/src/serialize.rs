/// Types that can be written into an outgoing frame.
pub trait Serialize<'a> {
    /// Writes the fixed part of `self` into `buf`.
    ///
    /// # Returns
    /// A trailing slice to be written right after `buf` without copying it, if any.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
