/// Box-drawing characters used by the schedule table
#[derive(Clone, Copy)]
pub enum TabChar {
    /// Vertical bar
    Bv,
    /// Horizontal bar
    Bh,
    /// Joint left
    Jl,
    /// Joint right
    Jr,
    /// Joint bottom left
    Jbl,
    /// Joint bottom right
    Jbr,
    /// Joint top left
    Jtl,
    /// Joint top right
    Jtr,
    /// Joint to top
    Jtt,
    /// Joint to bottom
    Jtb,
    /// Joint of the middle
    Jm,
}

impl TabChar {
    /// Value of the element
    pub fn val(self) -> char {
        match self {
            Self::Bv => '│',
            Self::Bh => '─',
            Self::Jl => '├',
            Self::Jr => '┤',
            Self::Jbl => '└',
            Self::Jbr => '┘',
            Self::Jtl => '┌',
            Self::Jtr => '┐',
            Self::Jtt => '┴',
            Self::Jtb => '┬',
            Self::Jm => '┼',
        }
    }
}

/// Position of an horizontal line inside the table
pub enum Position {
    Top,
    Middle,
    Bottom,
}

impl Position {
    /// Left edge, column joint and right edge of a line at this position
    pub fn joints(&self) -> (TabChar, TabChar, TabChar) {
        match self {
            Self::Top => (TabChar::Jtl, TabChar::Jtb, TabChar::Jtr),
            Self::Middle => (TabChar::Jl, TabChar::Jm, TabChar::Jr),
            Self::Bottom => (TabChar::Jbl, TabChar::Jtt, TabChar::Jbr),
        }
    }
}
