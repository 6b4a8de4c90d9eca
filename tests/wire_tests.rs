use halo_da::algs::communicator::CommTag;
use halo_da::algs::wire::{WireGridHdr, WireIndex, WireStashHdr, WIRE_VERSION, decode_vec};

#[test]
fn commtag_offset_wrap() {
    let t = CommTag::new(u16::MAX).offset(1);
    assert_eq!(t.as_u16(), 0);
}

#[test]
fn index_roundtrip() {
    for raw in [0usize, 1 << 31, usize::MAX >> 1] {
        assert_eq!(WireIndex::of(raw).get(), raw);
    }
}

#[test]
fn stash_header_fields() {
    let hdr = WireStashHdr::new(12, 2);
    assert_eq!((hdr.count(), hdr.mode()), (12, 2));
    let bytes = bytemuck::bytes_of(&hdr).to_vec();
    assert_eq!(decode_vec::<WireStashHdr>(&bytes).unwrap(), vec![hdr]);
}

#[test]
fn grid_header_carries_version() {
    let a = WireGridHdr::new(true, 0, 10, 1, 1, 2, 0);
    let b = WireGridHdr::new(false, 0, 10, 1, 1, 2, 0);
    assert_eq!(a.version(), WIRE_VERSION);
    assert_ne!(a, b);
}
