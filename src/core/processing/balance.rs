use super::literals::blank_literals;

/// Heuristic scope tracker counting one kind of bracket across lines.
///
/// Literal contents are blanked before counting, so `"{"` never moves the
/// balance. Unterminated literals and brackets inside comments can still make
/// the balance drift; callers treat it as a best-effort signal.
#[derive(Debug, Clone)]
pub struct BracketBalanceTracker {
    open: char,
    close: char,
    balance: i32,
    already_increased: bool,
}

impl BracketBalanceTracker {
    pub fn new(open: char, close: char) -> Self {
        Self {
            open,
            close,
            balance: 0,
            already_increased: false,
        }
    }

    /// Tracker for `{` / `}` scopes
    pub fn curly() -> Self {
        Self::new('{', '}')
    }

    /// Tracker for `(` / `)` groups
    pub fn round() -> Self {
        Self::new('(', ')')
    }

    /// Update the balance with every unescaped bracket in `line`.
    pub fn parse(&mut self, line: &str) {
        let blanked = blank_literals(line);
        let mut escaped = false;

        for ch in blanked.chars() {
            if escaped {
                escaped = false;
                continue;
            }
            if ch == '\\' {
                escaped = true;
            } else if ch == self.open {
                self.increase_balance();
            } else if ch == self.close {
                self.decrease_balance();
            }
        }
    }

    pub fn increase_balance(&mut self) {
        self.balance += 1;
        if self.balance > 0 {
            self.already_increased = true;
        }
    }

    pub fn decrease_balance(&mut self) {
        self.balance -= 1;
    }

    pub fn balance(&self) -> i32 {
        self.balance
    }

    pub fn is_balance_empty(&self) -> bool {
        self.balance == 0
    }

    /// Sticky: true once the balance went above zero since the last reset.
    pub fn already_increased(&self) -> bool {
        self.already_increased
    }

    pub fn reset(&mut self) {
        self.balance = 0;
        self.already_increased = false;
    }
}

impl Default for BracketBalanceTracker {
    fn default() -> Self {
        Self::curly()
    }
}
