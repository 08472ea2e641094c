use crate::buff::Buff;

#[test]
fn test_new_zero_size() {
    assert!(Buff::new(0).is_none());
}

#[test]
fn test_one_byte_kept_free() {
    let mut buff = Buff::new(8).unwrap();
    assert_eq!(8, buff.size());
    assert_eq!(7, buff.get_free());
    assert_eq!(0, buff.get_full());

    assert_eq!(7, buff.write(b"abcdefghij"));
    assert_eq!(0, buff.get_free());
    assert_eq!(7, buff.get_full());
    assert_eq!(0, buff.write(b"k"));
}

#[test]
fn test_read_in_order() {
    let mut buff = Buff::new(16).unwrap();
    buff.write(b"hello ");
    buff.write(b"world");

    let mut data = [0u8; 5];
    assert_eq!(5, buff.read(&mut data));
    assert_eq!(b"hello", &data);

    let mut data = [0u8; 16];
    assert_eq!(6, buff.read(&mut data));
    assert_eq!(b" world", &data[..6]);
    assert_eq!(0, buff.get_full());
}

#[test]
fn test_write_wraps_around() {
    let mut buff = Buff::new(8).unwrap();
    buff.write(b"abcdefg");

    let mut data = [0u8; 4];
    assert_eq!(4, buff.read(&mut data));
    assert_eq!(4, buff.get_free());

    assert_eq!(4, buff.write(b"hijk"));
    assert_eq!(7, buff.get_full());
    assert_eq!(0, buff.get_free());

    // Contiguous part ends at the end of the storage
    assert_eq!(b"efgh", buff.get_linear_block());
    assert_eq!(4, buff.get_linear_block_length());

    let mut data = [0u8; 7];
    assert_eq!(7, buff.read(&mut data));
    assert_eq!(b"efghijk", &data);
}

#[test]
fn test_peek_does_not_consume() {
    let mut buff = Buff::new(8).unwrap();
    buff.write(b"abcdefg");
    let mut data = [0u8; 4];
    buff.read(&mut data);
    buff.write(b"hijk");

    let mut data = [0u8; 4];
    assert_eq!(4, buff.peek(2, &mut data));
    assert_eq!(b"ghij", &data);
    assert_eq!(7, buff.get_full());

    // Skip beyond the stored bytes
    assert_eq!(0, buff.peek(7, &mut data));
}

#[test]
fn test_skip() {
    let mut buff = Buff::new(8).unwrap();
    buff.write(b"abcdefg");
    let mut data = [0u8; 4];
    buff.read(&mut data);
    buff.write(b"hijk");

    assert_eq!(5, buff.skip(5));
    assert_eq!(b"jk", buff.get_linear_block());

    // Never more than stored
    assert_eq!(2, buff.skip(10));
    assert_eq!(0, buff.get_full());
    assert_eq!(0, buff.get_linear_block_length());
}

#[test]
fn test_reset() {
    let mut buff = Buff::new(8).unwrap();
    buff.write(b"abc");
    buff.reset();

    assert_eq!(0, buff.get_full());
    assert_eq!(7, buff.get_free());
    assert!(buff.get_linear_block().is_empty());
}
