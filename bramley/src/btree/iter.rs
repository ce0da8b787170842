use super::bramley::Direction;
use super::node::Node;

/// An in-order iterator over the entries of a [`super::Bramley`].
///
/// Each stack frame is a node and a cursor. Ascending cursors count the entries already
/// yielded; descending cursors count the entries still to be yielded.
pub struct Iter<'a, E> {
    stack: Vec<(&'a Node<E>, usize)>,
    direction: Direction,
    remaining: usize,
}

impl<'a, E> Iter<'a, E> {
    pub(crate) fn new(root: Option<&'a Node<E>>, direction: Direction, len: usize) -> Self {
        let mut iter = Self {
            stack: vec![],
            direction,
            remaining: len,
        };
        if let Some(root) = root {
            iter.descend(root);
        }
        iter
    }

    // Push the path to the first entry (in our direction) of the subtree rooted at node.
    fn descend(&mut self, mut node: &'a Node<E>) {
        loop {
            let (cursor, next) = match self.direction {
                Direction::Ascending => (0, node.children().first()),
                Direction::Descending => (node.len(), node.children().last()),
            };
            self.stack.push((node, cursor));
            match next {
                Some(child) => node = child,
                None => break,
            }
        }
    }
}

impl<'a, E> Iterator for Iter<'a, E> {
    type Item = &'a E;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (node, cursor) = self.stack.last_mut()?;
            let node: &'a Node<E> = *node;
            let (entry, child) = match self.direction {
                Direction::Ascending if *cursor < node.len() => {
                    let idx = *cursor;
                    *cursor += 1;
                    (&node.entries()[idx], node.children().get(idx + 1))
                }
                Direction::Descending if *cursor > 0 => {
                    *cursor -= 1;
                    let idx = *cursor;
                    (&node.entries()[idx], node.children().get(idx))
                }
                _ => {
                    self.stack.pop();
                    continue;
                }
            };
            if let Some(child) = child {
                self.descend(child);
            }
            self.remaining = self.remaining.saturating_sub(1);
            return Some(entry);
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<E> ExactSizeIterator for Iter<'_, E> {}

#[cfg(test)]
mod tests {
    use super::super::Bramley;
    use super::*;

    #[test]
    fn it_iterates_empty_tree() {
        let tree = Bramley::<u32>::try_new(3).expect("creates tree");
        assert_eq!(tree.iter(Direction::Ascending).count(), 0);
        assert_eq!(tree.iter(Direction::Descending).count(), 0);
    }

    #[test]
    fn it_iterates_in_both_directions() {
        let mut tree = Bramley::<usize>::try_new(4).expect("creates tree");
        let input = vec![
            7, 8, 14, 20, 21, 27, 34, 42, 43, 47, 48, 52, 64, 72, 90, 91, 93, 94, 97,
        ];
        for i in input.iter().rev() {
            tree.add(*i).expect("insert worked");
        }

        let ascending = tree.iter(Direction::Ascending);
        assert_eq!(ascending.len(), input.len());
        assert_eq!(ascending.copied().collect::<Vec<usize>>(), input);

        let mut reversed = input.clone();
        reversed.reverse();
        assert_eq!(
            tree.iter(Direction::Descending)
                .copied()
                .collect::<Vec<usize>>(),
            reversed
        );
    }
}
