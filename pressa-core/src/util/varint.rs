use std::io::Read;

pub fn put_uvarint(out: &mut Vec<u8>, mut x: u64) {
    while x >= 0x80 {
        out.push((x as u8) | 0x80);
        x >>= 7;
    }
    out.push(x as u8);
}

/// `Ok(None)` on clean EOF before the first byte.
pub fn get_uvarint<R: Read>(r: &mut R) -> std::io::Result<Option<u64>> {
    let mut x: u64 = 0;
    let mut s: u32 = 0;
    for i in 0..10 {
        let mut b = [0u8; 1];
        if r.read(&mut b)? == 0 {
            if i == 0 {
                return Ok(None);
            }
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        let byte = b[0];
        if byte < 0x80 {
            x |= (byte as u64) << s;
            return Ok(Some(x));
        }
        x |= ((byte & 0x7f) as u64) << s;
        s += 7;
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "varint too long",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varints_cover_boundaries() {
        for x in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            put_uvarint(&mut buf, x);
            assert_eq!(get_uvarint(&mut &buf[..]).unwrap(), Some(x));
        }
    }

    #[test]
    fn eof_handling() {
        assert_eq!(get_uvarint(&mut &[][..]).unwrap(), None);
        assert!(get_uvarint(&mut &[0x80u8][..]).is_err());
    }
}
