//! Pseudo-random binary sequence from a 16-bit Fibonacci LFSR.

/// Seed of the excitation register.
pub const DEFAULT_SEED: u16 = 0xACE1;

/// Number of distinct non-zero states the register walks through before repeating.
pub const PERIOD: usize = (1 << 16) - 1;

/// 16-bit LFSR with taps on bits 0, 2, 3 and 5.
///
/// Each step shifts the register right and feeds the XOR of the taps into bit 15.  The produced
/// bit is bit 0 of the new state.
///
/// # Examples
///
/// ```
/// use fixed_control::identification::Prbs;
///
/// let mut prbs = Prbs::default();
/// assert_eq!(prbs.next_bit(), false);
/// assert_eq!(prbs.state(), 0x5670);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prbs {
    state: u16,
}

impl Prbs {
    /// A zero seed would lock the register, it is replaced by one.
    pub fn new(seed: u16) -> Self {
        Self { state: seed.max(1) }
    }

    pub fn state(&self) -> u16 {
        self.state
    }

    /// Advance the register one step.
    pub fn next_bit(&mut self) -> bool {
        let l = self.state;
        let feedback = (l ^ (l >> 2) ^ (l >> 3) ^ (l >> 5)) & 1;
        self.state = (l >> 1) | (feedback << 15);
        self.state & 1 != 0
    }

    /// Map the sequence onto two levels.
    pub fn levels<T: Copy>(self, high: T, low: T) -> impl Iterator<Item = T> {
        self.map(move |bit| if bit { high } else { low })
    }
}

impl Default for Prbs {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl Iterator for Prbs {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        Some(self.next_bit())
    }
}
