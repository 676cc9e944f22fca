use bytes::Buf;

use crate::error::{Error, Result};

pub trait MarshalSize {
    fn marshal_size(&self) -> usize;
}

pub trait Marshal: MarshalSize {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize>;

    fn marshal(&self) -> Result<Vec<u8>> {
        let l = self.marshal_size();
        let mut buf = vec![0u8; l];
        let n = self.marshal_to(&mut buf)?;
        if n != l {
            Err(Error::ErrMarshalSizeMismatch(n, l))
        } else {
            Ok(buf)
        }
    }
}

pub trait Unmarshal: Sized {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf;
}
