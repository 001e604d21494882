//! Root footer and footer recovery
//!
//! Every commit ends with a 10-byte footer naming the new root:
//!
//! ```text
//! [0..4]  root pointer: u32 (big-endian)
//! [4..10] magic: 0xFF 'b' 't' 'r' 'e' 'e'
//! ```
//!
//! The newest footer is normally the last 10 bytes of the file. When a crash
//! tore it, the file is scanned backward for the newest intact footer.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom};

use super::node::NodePointer;

/// Marker that ends every footer
pub const MAGIC: [u8; 6] = *b"\xffbtree";

/// Root pointer + magic
pub const FOOTER_SIZE: usize = 4 + MAGIC.len();

/// Distance between successive recovery windows
pub const SCAN_STRIDE: u64 = 128;

/// Bytes read per recovery window; twice the stride so the magic can never
/// straddle a window boundary unseen
pub const SCAN_WINDOW: u64 = 2 * SCAN_STRIDE;

/// A footer found in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Root node pointer
    pub root: NodePointer,
    /// File offset of the footer's first byte
    pub offset: u64,
}

impl Footer {
    /// Serialize a footer for `root`
    pub fn encode(root: NodePointer) -> io::Result<[u8; FOOTER_SIZE]> {
        let mut buf = [0u8; FOOTER_SIZE];
        (&mut buf[0..4]).write_u32::<BigEndian>(root)?;
        buf[4..].copy_from_slice(&MAGIC);
        Ok(buf)
    }

    /// Parse a footer located at `offset`, if the magic is intact
    pub fn parse(data: &[u8; FOOTER_SIZE], offset: u64) -> Option<Self> {
        if data[4..] != MAGIC {
            return None;
        }
        Some(Footer {
            root: BigEndian::read_u32(&data[0..4]),
            offset,
        })
    }
}

/// Outcome of [`locate_footer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedFooter {
    pub footer: Footer,
    /// True when the trailing footer was unusable and a backward scan found this one
    pub recovered: bool,
}

/// Find the newest footer that `accept` approves.
///
/// `accept` returns `Ok(false)` to skip a candidate; an error aborts the
/// search and is returned as is. The trailing 10 bytes are tried first. Otherwise windows of
/// [`SCAN_WINDOW`] bytes are read every [`SCAN_STRIDE`] bytes from the end,
/// newest candidate first. A magic with fewer than four bytes before it in
/// its window is left for the next (earlier) window.
pub fn locate_footer<R, F, E>(r: &mut R, mut accept: F) -> Result<Option<LocatedFooter>, E>
where
    R: Read + Seek,
    F: FnMut(&mut R, &Footer) -> Result<bool, E>,
    E: From<io::Error>,
{
    let len = r.seek(SeekFrom::End(0))?;
    let mut upper = len;

    if len >= FOOTER_SIZE as u64 {
        let offset = len - FOOTER_SIZE as u64;
        let mut data = [0u8; FOOTER_SIZE];
        r.seek(SeekFrom::Start(offset))?;
        r.read_exact(&mut data)?;

        if let Some(footer) = Footer::parse(&data, offset) {
            if accept(r, &footer)? {
                return Ok(Some(LocatedFooter {
                    footer,
                    recovered: false,
                }));
            }
            upper = offset + 4;
        }
    }

    let mut stride = 1u64;
    loop {
        let start = len.saturating_sub(SCAN_STRIDE * stride);
        let end = (start + SCAN_WINDOW).min(len);
        let mut window = vec![0u8; (end - start) as usize];
        r.seek(SeekFrom::Start(start))?;
        r.read_exact(&mut window)?;

        if window.len() >= FOOTER_SIZE {
            for pos in (4..=window.len() - MAGIC.len()).rev() {
                let abs = start + pos as u64;
                if abs >= upper || window[pos..pos + MAGIC.len()] != MAGIC {
                    continue;
                }
                upper = abs;

                let footer = Footer {
                    root: BigEndian::read_u32(&window[pos - 4..pos]),
                    offset: abs - 4,
                };
                if accept(r, &footer)? {
                    return Ok(Some(LocatedFooter {
                        footer,
                        recovered: true,
                    }));
                }
            }
        }

        if start == 0 {
            return Ok(None);
        }
        stride += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn accept_all(_: &mut Cursor<Vec<u8>>, _: &Footer) -> io::Result<bool> {
        Ok(true)
    }

    #[test]
    fn test_trailing_footer() {
        let mut data = vec![0xAAu8; 40];
        data.extend_from_slice(&Footer::encode(17).unwrap());
        let found = locate_footer(&mut Cursor::new(data), accept_all)
            .unwrap()
            .unwrap();
        assert_eq!(found.footer, Footer { root: 17, offset: 40 });
        assert!(!found.recovered);
    }

    #[test]
    fn test_torn_footer_recovers_previous() {
        let mut data = vec![0u8; 300];
        data.extend_from_slice(&Footer::encode(5).unwrap());
        data.extend_from_slice(&[1u8; 500]);
        data.extend_from_slice(&Footer::encode(900).unwrap());
        // crash halfway through the newest footer
        data.truncate(data.len() - 3);

        let found = locate_footer(&mut Cursor::new(data), accept_all)
            .unwrap()
            .unwrap();
        assert_eq!(found.footer, Footer { root: 5, offset: 300 });
        assert!(found.recovered);
    }

    #[test]
    fn test_rejected_candidate_falls_back() {
        let mut data = vec![0u8; 20];
        data.extend_from_slice(&Footer::encode(3).unwrap());
        data.extend_from_slice(&[2u8; 200]);
        data.extend_from_slice(&Footer::encode(77).unwrap());

        let found = locate_footer(&mut Cursor::new(data), |_, f| io::Result::Ok(f.root != 77))
            .unwrap()
            .unwrap();
        assert_eq!(found.footer.root, 3);
        assert!(found.recovered);
    }

    #[test]
    fn test_accept_error_aborts_search() {
        let mut data = vec![0u8; 20];
        data.extend_from_slice(&Footer::encode(3).unwrap());
        data.extend_from_slice(&[2u8; 200]);
        data.extend_from_slice(&Footer::encode(77).unwrap());

        let mut seen = Vec::new();
        let err = locate_footer(&mut Cursor::new(data), |_, f| {
            seen.push(f.root);
            Err::<bool, _>(io::Error::new(io::ErrorKind::Other, "disk gone"))
        })
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        // the older footer was never offered
        assert_eq!(seen, vec![77]);
    }

    #[test]
    fn test_footer_near_file_start() {
        let mut data = vec![9u8; 11];
        data.extend_from_slice(&Footer::encode(0).unwrap());
        data.extend_from_slice(&[7u8; 50]);

        let found = locate_footer(&mut Cursor::new(data), accept_all)
            .unwrap()
            .unwrap();
        assert_eq!(found.footer, Footer { root: 0, offset: 11 });
    }

    #[test]
    fn test_no_magic() {
        let data = vec![0x42u8; 1000];
        assert!(locate_footer(&mut Cursor::new(data), accept_all)
            .unwrap()
            .is_none());
        assert!(locate_footer(&mut Cursor::new(Vec::new()), accept_all)
            .unwrap()
            .is_none());
    }
}
