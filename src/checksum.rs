//! # Checksums
//!
//! One's complement sums over 16 bit words, RFC 1071 style. Words are read in native byte order,
//! the one's complement sum doesn't care as long as the result is written back the same way.
//!
//! - [inet_checksum] - the finished IP header style checksum
//! - [csum_partial] - an unfolded 32 bit accumulator, for data arriving in pieces
//! - [csum_block_add] - glue two accumulators together, fixing the byte order for odd offsets
//! - [csum_fold] - turn an accumulator into the final 16 bit value
//!
//! All of them are plain functions, no shared state.

/// The Internet checksum of `buf`, starting from `csum`.
pub fn inet_checksum(buf: &[u8], csum: u32) -> u16 {
    let mut sum = u64::from(csum);
    let mut words = buf.chunks_exact(2);
    for w in &mut words {
        sum += u64::from(u16::from_ne_bytes([w[0], w[1]]));
    }
    if let [b] = words.remainder() {
        sum += u64::from(u16::from_ne_bytes([*b, 0]));
    }
    !(fold(sum) as u16)
}

/// Sum `buf` into `csum` without folding to 16 bits.
///
/// The accumulator is folded whenever the top bit shows up after adding a word.
/// The seed is taken as it is, it's only folded first if the next word wouldn't fit.
/// An odd trailing byte counts as the first byte of a zero padded word.
pub fn csum_partial(buf: &[u8], csum: u32) -> u32 {
    let mut sum = csum;
    let mut words = buf.chunks_exact(2);
    for w in &mut words {
        sum = fold_once(add(sum, u16::from_ne_bytes([w[0], w[1]])));
    }
    if let [b] = words.remainder() {
        sum = add(sum, u16::from_ne_bytes([*b, 0]));
    }
    sum
}

/// Copy `src` into the front of `dst` and return its partial sum.
///
/// # Panics
/// If `dst` is shorter than `src`.
pub fn csum_partial_copy(src: &[u8], dst: &mut [u8], csum: u32) -> u32 {
    let dst = &mut dst[..src.len()];
    dst.copy_from_slice(src);
    csum_partial(dst, csum)
}

/// Fold an accumulator into the 16 bit checksum.
///
/// `0xffff` stays as it is, everything else is complemented.
pub fn csum_fold(csum: u32) -> u16 {
    let sum = fold(u64::from(csum)) as u16;
    if sum == 0xffff {
        sum
    } else {
        !sum
    }
}

/// Add the accumulator `csum2` of a block starting at byte `offset` to `csum`.
///
/// A block at an odd offset had its words read with the bytes the other way around,
/// swapping the bytes of the sum puts them back.
pub fn csum_block_add(csum: u32, csum2: u32, offset: usize) -> u32 {
    let csum2 = if offset % 2 == 1 {
        ((csum2 & 0x00ff_00ff) << 8) + ((csum2 >> 8) & 0x00ff_00ff)
    } else {
        csum2
    };
    let (sum, carry) = csum.overflowing_add(csum2);
    // end-around carry
    sum + u32::from(carry)
}

fn fold(mut sum: u64) -> u64 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum
}

fn add(sum: u32, word: u16) -> u32 {
    let word = u32::from(word);
    sum.checked_add(word).unwrap_or_else(|| fold_once(sum) + word)
}

fn fold_once(sum: u32) -> u32 {
    if sum & 0x8000_0000 != 0 {
        (sum & 0xffff) + (sum >> 16)
    } else {
        sum
    }
}

#[cfg(test)]
mod test {
    use proptest::{collection::vec, prelude::*};

    use super::*;

    // RFC 1071, section 3
    const SAMPLE: [u8; 8] = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];

    #[test]
    fn rfc1071_sample() {
        assert_eq!(inet_checksum(&SAMPLE, 0).to_ne_bytes(), [0x22, 0x0d]);
        assert_eq!(csum_fold(csum_partial(&SAMPLE, 0)).to_ne_bytes(), [0x22, 0x0d]);
    }

    #[test]
    fn checksum_of_data_plus_checksum_is_zero() {
        let mut data = SAMPLE.to_vec();
        data.extend_from_slice(&inet_checksum(&SAMPLE, 0).to_ne_bytes());
        assert_eq!(inet_checksum(&data, 0), 0);
    }

    #[test]
    fn odd_trailing_byte() {
        assert_eq!(
            csum_partial(&[0xab], 0),
            u32::from(u16::from_ne_bytes([0xab, 0]))
        );
        assert_eq!(csum_partial(&[], 7), 7);
    }

    #[test]
    fn seed_passes_through_until_a_word_is_added() {
        assert_eq!(csum_partial(&[], 0x8000_0000), 0x8000_0000);
        assert_eq!(csum_partial(&[], u32::MAX), u32::MAX);
        // 0x8000_0000 + 0, then folded because of the top bit
        assert_eq!(csum_partial(&[0, 0], 0x8000_0000), 0x8000);
        // doesn't fit => folded before the add
        assert_eq!(csum_partial(&[0xff, 0xff], u32::MAX), 0x1fffe + 0xffff);
    }

    #[test]
    fn fold_keeps_all_ones() {
        assert_eq!(csum_fold(0xffff), 0xffff);
        assert_eq!(csum_fold(0), 0xffff);
        assert_eq!(csum_fold(0x0001_fffe), 0xffff);
        assert_eq!(csum_fold(0x0001_fffd), 0x0001);
        assert_eq!(csum_fold(0x1234), !0x1234);
    }

    #[test]
    fn block_add_carries_around() {
        assert_eq!(csum_block_add(u32::MAX, 1, 0), 1);
        assert_eq!(csum_block_add(0, 0x0102_0304, 1), 0x0201_0403);
    }

    #[test]
    fn partial_never_overflows() {
        let data = vec![0xff; 1 << 17];
        let sum = csum_partial(&data, u32::MAX);
        assert_eq!(csum_fold(sum), csum_fold(csum_partial(&data, 0xffff)));
    }

    proptest! {
        #[test]
        fn block_add_matches_the_whole(
            a in vec(any::<u8>(), 0..64),
            b in vec(any::<u8>(), 0..64),
        ) {
            let whole = [a.as_slice(), b.as_slice()].concat();
            let split = csum_block_add(csum_partial(&a, 0), csum_partial(&b, 0), a.len());
            prop_assert_eq!(csum_fold(csum_partial(&whole, 0)), csum_fold(split));
        }

        #[test]
        fn partial_copy_copies(src in vec(any::<u8>(), 0..64), seed in any::<u32>()) {
            let mut dst = vec![0u8; src.len() + 3];
            let sum = csum_partial_copy(&src, &mut dst, seed);
            prop_assert_eq!(&dst[..src.len()], src.as_slice());
            prop_assert_eq!(sum, csum_partial(&src, seed));
        }

        #[test]
        fn inet_matches_folded_partial(data in vec(any::<u8>(), 0..64)) {
            let folded = csum_fold(csum_partial(&data, 0));
            let inet = inet_checksum(&data, 0);
            // the two only disagree on how they spell zero
            prop_assert!(
                folded == inet
                    || (folded == 0xffff && inet == 0)
                    || (folded == 0 && inet == 0xffff)
            );
        }
    }
}
