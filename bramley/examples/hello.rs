use anyhow::Result;

use bramley::btree::Bramley;
use bramley::record::Pair;

fn main() -> Result<()> {
    let key = "something".to_string();
    let value = 3;

    // Create a tree with a branching factor of 7
    let mut tree = Bramley::<Pair<String, usize>>::try_new(7)?;

    // Make sure we can't find "something" in our tree
    assert!(!tree.contains(&key));
    assert!(tree.find(&key).is_none());

    // Insert "something" with a value of 3
    tree.add(Pair::new(key.clone(), value))?;

    // Make sure we can find "something" in our tree
    assert!(tree.contains(&key));
    assert_eq!(tree.find(&key).map(|pair| pair.value), Some(value));

    // Write our tree out and read it back in again
    tree.write("hello.idx", "hello.dat")?;
    let mut tree = Bramley::<Pair<String, usize>>::try_read("hello.idx", "hello.dat")?;
    assert_eq!(tree.find(&key).map(|pair| pair.value), Some(value));

    // Remove "something"
    tree.delete(&key)?;
    assert!(!tree.contains(&key));
    assert!(tree.find(&key).is_none());

    std::fs::remove_file("hello.idx")?;
    std::fs::remove_file("hello.dat")?;
    Ok(())
}
