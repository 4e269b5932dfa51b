//! BFS over the 4×4 vault grid, transforming the orb's starting weight
//! into the door's target weight.

use crate::app_error::AppError;
use crate::vm::Vm;

const SIZE: usize = 4;
const START_WEIGHT: i64 = 22;
const TARGET_WEIGHT: i64 = 30;
const MAX_MOVES: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
}

impl Operator {
    fn apply(self, lhs: i64, rhs: i64) -> i64 {
        match self {
            Operator::Add => lhs + rhs,
            Operator::Sub => lhs - rhs,
            Operator::Mul => lhs * rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    Wall,
    Start,
    End(i64),
    Value(i64),
    Op(Operator),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// Exploration order used to break BFS ties.
    const ORDER: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// The word the text adventure expects typed at its prompt.
    pub fn command(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::East => "east",
            Direction::South => "south",
            Direction::West => "west",
        }
    }

    fn step(self, x: usize, y: usize) -> Option<(usize, usize)> {
        match self {
            Direction::North if y + 1 < SIZE => Some((x, y + 1)),
            Direction::East if x + 1 < SIZE => Some((x + 1, y)),
            Direction::South if y > 0 => Some((x, y - 1)),
            Direction::West if x > 0 => Some((x - 1, y)),
            _ => None,
        }
    }
}

/// The published 4×4 grid, `[y][x]` with `(0,0)` ("A") at the bottom
/// left and `(3,3)` ("V") at the top right.
fn grid() -> [[Cell; SIZE]; SIZE] {
    use Cell::*;
    use Operator::*;
    [
        [Start, Op(Sub), Value(9), Wall],
        [Op(Add), Value(4), Op(Sub), Value(18)],
        [Value(4), Wall, Value(11), Wall],
        [Wall, Value(8), Op(Sub), End(1)],
    ]
}

#[derive(Debug, Clone)]
struct State {
    x: usize,
    y: usize,
    weight: i64,
    pending_op: Option<Operator>,
    path: Vec<Direction>,
}

/// Find a shortest move sequence from the start cell to the vault door
/// that leaves the orb at exactly the target weight. Ties among
/// equal-length paths are broken by exploration order N, E, S, W.
pub fn find_shortest_path() -> Option<Vec<Direction>> {
    let grid = grid();
    let mut queue = std::collections::VecDeque::new();
    let mut visited = std::collections::HashSet::new();

    queue.push_back(State {
        x: 0,
        y: 0,
        weight: START_WEIGHT,
        pending_op: None,
        path: Vec::new(),
    });

    while let Some(state) = queue.pop_front() {
        if state.path.len() >= MAX_MOVES {
            continue;
        }
        for &direction in Direction::ORDER.iter() {
            let Some((nx, ny)) = direction.step(state.x, state.y) else {
                continue;
            };
            if (nx, ny) == (0, 0) {
                continue;
            }

            let mut path = state.path.clone();
            path.push(direction);

            match grid[ny][nx] {
                Cell::Wall => continue,
                Cell::Start => continue,
                Cell::Op(op) => {
                    let key = (nx, ny, state.weight, Some(op));
                    if !visited.insert(key) {
                        continue;
                    }
                    queue.push_back(State {
                        x: nx,
                        y: ny,
                        weight: state.weight,
                        pending_op: Some(op),
                        path,
                    });
                }
                Cell::Value(value) => {
                    let Some(op) = state.pending_op else {
                        continue;
                    };
                    let weight = op.apply(state.weight, value);
                    if weight <= 0 {
                        continue;
                    }
                    let key = (nx, ny, weight, None);
                    if !visited.insert(key) {
                        continue;
                    }
                    queue.push_back(State {
                        x: nx,
                        y: ny,
                        weight,
                        pending_op: None,
                        path,
                    });
                }
                Cell::End(value) => {
                    let Some(op) = state.pending_op else {
                        continue;
                    };
                    let weight = op.apply(state.weight, value);
                    if weight == TARGET_WEIGHT {
                        return Some(path);
                    }
                }
            }
        }
    }

    None
}

/// Find the path and enqueue it as the text adventure's own movement
/// commands, one line per direction, the way a player would type them.
pub fn solve(vm: &mut Vm) -> Result<Vec<Direction>, AppError> {
    let path = find_shortest_path().ok_or(AppError::SolverNotFound { solver: "vault" })?;
    for direction in &path {
        vm.feed_input(direction.command().bytes());
        vm.feed_input(std::iter::once(b'\n'));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_a_path_within_the_move_budget() {
        let path = find_shortest_path().expect("published grid is solvable");
        assert!(path.len() <= MAX_MOVES);
    }

    #[test]
    fn path_reaches_target_weight() {
        let path = find_shortest_path().unwrap();
        let grid = grid();
        let mut x = 0usize;
        let mut y = 0usize;
        let mut weight = START_WEIGHT;
        let mut pending_op = None;

        for (i, direction) in path.iter().enumerate() {
            let (nx, ny) = direction.step(x, y).unwrap();
            assert_ne!((nx, ny), (0, 0), "path must not re-enter the start cell");
            match grid[ny][nx] {
                Cell::Wall => panic!("path must not enter a wall"),
                Cell::Start => panic!("path must not re-enter start"),
                Cell::Op(op) => pending_op = Some(op),
                Cell::Value(value) => {
                    let op = pending_op.expect("value cell requires a preceding operator");
                    weight = op.apply(weight, value);
                    assert!(weight > 0, "orb shattered at step {i}");
                    pending_op = None;
                }
                Cell::End(value) => {
                    let op = pending_op.expect("door requires a preceding operator");
                    weight = op.apply(weight, value);
                }
            }
            x = nx;
            y = ny;
        }

        assert_eq!((x, y), (3, 3));
        assert_eq!(weight, TARGET_WEIGHT);
    }

    #[test]
    fn solve_feeds_commands_into_vm_input() {
        use crate::memory::Memory;

        let mut vm = Vm::new(Memory::new());
        let path = solve(&mut vm).unwrap();

        let expected: Vec<u8> = path
            .iter()
            .flat_map(|d| d.command().bytes().chain(std::iter::once(b'\n')))
            .collect();
        assert_eq!(Vec::from(vm.input.clone()), expected);
    }
}
