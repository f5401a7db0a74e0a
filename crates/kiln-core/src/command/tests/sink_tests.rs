use crate::command::OutputTail;

#[test]
fn test_tail_keeps_last_lines() {
    let mut tail = OutputTail::new(3);
    for i in 0..10 {
        tail.push(format!("l{}", i));
    }
    assert_eq!(tail.len(), 3);
    assert_eq!(tail.dropped(), 7);
    assert_eq!(tail.render(), "l7\nl8\nl9");
}

#[test]
fn test_zero_capacity_tail() {
    let mut tail = OutputTail::new(0);
    tail.push("ignored".to_string());
    assert!(tail.is_empty());
    assert_eq!(tail.render(), "");
}
