use crate::pbuf::Pbuf;
use crate::Error;
use embedded_nal::Ipv4Addr;

fn pbuf(data: &[u8]) -> Pbuf {
    let pbuf = Pbuf::new(data.len());
    pbuf.take(data, 0).unwrap();
    pbuf
}

#[test]
fn test_new_is_zeroed() {
    let pbuf = Pbuf::new(4);
    assert_eq!(4, pbuf.len());
    assert_eq!(4, pbuf.tot_len());
    assert_eq!(vec![0u8; 4], pbuf.to_vec());
    assert_eq!(Ipv4Addr::UNSPECIFIED, pbuf.ip());
}

#[test]
fn test_free_last_reference() {
    let pbuf = Pbuf::new(4);
    let copy = pbuf.clone();
    assert_eq!(2, pbuf.ref_count());

    assert_eq!(0, copy.free());
    assert_eq!(1, pbuf.ref_count());
    assert_eq!(1, pbuf.free());
}

#[test]
fn test_free_stops_at_shared_node() {
    let head = pbuf(b"foo");
    let tail = pbuf(b"bar");
    head.chain(&tail);
    assert_eq!(2, tail.ref_count());

    assert_eq!(1, head.free());
    assert_eq!(1, tail.ref_count());
    assert_eq!(b"bar".to_vec(), tail.to_vec());
}

#[test]
fn test_free_whole_chain() {
    let head = pbuf(b"a");
    head.cat(pbuf(b"b"));
    head.cat(pbuf(b"c"));

    assert_eq!(3, head.tot_len());
    assert_eq!(3, head.free());
}

#[test]
fn test_cat_updates_tot_len() {
    let head = pbuf(b"foo");
    head.cat(pbuf(b"bar"));
    head.cat(pbuf(b"baz"));

    assert_eq!(3, head.len());
    assert_eq!(9, head.tot_len());
    assert_eq!(6, head.next().unwrap().tot_len());
    assert_eq!(b"foobarbaz".to_vec(), head.to_vec());
}

#[test]
fn test_unchain() {
    let head = pbuf(b"foo");
    head.cat(pbuf(b"bar"));

    let tail = head.unchain().unwrap();
    assert_eq!(3, head.tot_len());
    assert_eq!(b"bar".to_vec(), tail.to_vec());
    assert!(head.next().is_none());
    assert!(head.unchain().is_none());
}

#[test]
fn test_take_across_nodes() {
    let head = Pbuf::new(3);
    head.cat(Pbuf::new(3));

    head.take(b"bcd", 1).unwrap();
    assert_eq!(b"\0bcd\0\0".to_vec(), head.to_vec());
    assert_eq!(Err(Error::Par), head.take(b"xyz", 4));
}

#[test]
fn test_copy_with_offset() {
    let head = pbuf(b"foo");
    head.cat(pbuf(b"bar"));

    let mut data = [0u8; 4];
    assert_eq!(4, head.copy(&mut data, 1));
    assert_eq!(b"ooba", &data);

    // Range exceeds the chain
    assert_eq!(0, head.copy(&mut data, 3));

    let mut data = [0u8; 8];
    assert_eq!(3, head.copy_partial(&mut data, 3));
    assert_eq!(b"bar", &data[..3]);
}

#[test]
fn test_offset_near_usize_max() {
    let head = pbuf(b"foo");
    let mut data = [0u8; 2];

    assert_eq!(Err(Error::Par), head.take(b"xy", usize::MAX));
    assert_eq!(0, head.copy(&mut data, usize::MAX));
    assert_eq!(0, head.copy_partial(&mut data, usize::MAX));
    assert_eq!(usize::MAX, head.memcmp(b"xy", usize::MAX));
}

#[test]
fn test_get_at() {
    let head = pbuf(b"foo");
    head.cat(pbuf(b"bar"));

    assert_eq!(Some(b'f'), head.get_at(0));
    assert_eq!(Some(b'a'), head.get_at(4));
    assert_eq!(None, head.get_at(6));
}

#[test]
fn test_memcmp() {
    let head = pbuf(b"foo");
    head.cat(pbuf(b"bar"));

    assert_eq!(0, head.memcmp(b"oba", 2));
    assert_eq!(3, head.memcmp(b"obx", 2));
    assert_eq!(1, head.memcmp(b"x", 0));
    assert_eq!(usize::MAX, head.memcmp(b"barbar", 3));
}

#[test]
fn test_memfind_across_nodes() {
    let head = pbuf(b"foo");
    head.cat(pbuf(b"bar"));

    assert_eq!(Some(2), head.memfind(b"ob", 0));
    assert_eq!(Some(3), head.strfind("bar", 0));
    assert_eq!(None, head.memfind(b"oo", 2));
    assert_eq!(None, head.memfind(b"", 0));
    assert_eq!(None, head.strfind("foobarbaz", 0));
}

#[test]
fn test_advance() {
    let pbuf = pbuf(b"hello");

    assert!(pbuf.advance(2));
    assert_eq!(3, pbuf.tot_len());
    assert_eq!(b"llo".to_vec(), pbuf.to_vec());

    assert!(pbuf.advance(-2));
    assert_eq!(b"hello".to_vec(), pbuf.to_vec());

    assert!(!pbuf.advance(-1));
    assert!(!pbuf.advance(6));
    assert!(!pbuf.advance(0));
}

#[test]
fn test_remote_address() {
    let pbuf = Pbuf::new(1);
    pbuf.set_ip(Ipv4Addr::new(192, 168, 1, 2), 80);

    assert_eq!(Ipv4Addr::new(192, 168, 1, 2), pbuf.ip());
    assert_eq!(80, pbuf.port());
}
