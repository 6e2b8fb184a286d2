use gym_bridge_protocol::Board;

/// Called for every board of a scan
pub type BoardCallback = Box<dyn FnMut(&Board) + Send>;

/// What changed in the registry after a scan
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanDelta {
    pub added: Vec<Board>,
    pub removed: Vec<Board>,
}

impl ScanDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Boards known on the gym LAN, reconciled against discovery scans by IP
///
/// Owned by the discovery loop; no internal locking.
#[derive(Default)]
pub struct BoardRegistry {
    boards: Vec<Board>,
    initialized: bool,
    on_board: Option<BoardCallback>,
}

impl BoardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to scanned boards; replaces any previous subscriber
    pub fn on_board<F>(&mut self, callback: F)
    where
        F: FnMut(&Board) + Send + 'static,
    {
        self.on_board = Some(Box::new(callback));
    }

    /// Reconcile the registry with a full scan
    ///
    /// Boards are matched by IP: those missing from the scan are reported as
    /// removed and unknown ones as added. The registry then holds the scanned
    /// boards, so a rescan refreshes the HUB id and connection state of a
    /// known IP. The subscriber is notified for every board in the scan,
    /// changed or not.
    pub fn set_boards(&mut self, scan: Vec<Board>) -> ScanDelta {
        let scan = dedup_by_ip(scan);
        let mut delta = ScanDelta::default();

        if !self.initialized {
            self.initialized = true;
            delta.added = scan.clone();
            self.boards = scan.clone();
        } else {
            let previous = std::mem::replace(&mut self.boards, scan.clone());
            delta.added = scan
                .iter()
                .filter(|b| !previous.iter().any(|known| known.ip == b.ip))
                .cloned()
                .collect();
            delta.removed = previous
                .into_iter()
                .filter(|known| !scan.iter().any(|b| b.ip == known.ip))
                .collect();
        }

        if !delta.is_empty() {
            tracing::info!(
                "Board scan: {} added, {} removed, {} known",
                delta.added.len(),
                delta.removed.len(),
                self.boards.len()
            );
        }

        if let Some(callback) = self.on_board.as_mut() {
            for board in &scan {
                callback(board);
            }
        }

        delta
    }

    /// Record a single sighted board without evicting the others
    ///
    /// Returns `true` when the board was not known before.
    pub fn set_board(&mut self, board: Board) -> bool {
        self.initialized = true;
        let added = match self.boards.iter_mut().find(|b| b.ip == board.ip) {
            Some(existing) => {
                *existing = board.clone();
                false
            }
            None => {
                self.boards.push(board.clone());
                true
            }
        };

        if let Some(callback) = self.on_board.as_mut() {
            callback(&board);
        }
        added
    }

    /// Forget a board by its IP; returns the removed entry
    pub fn remove_board(&mut self, board: &Board) -> Option<Board> {
        let index = self.boards.iter().position(|b| b.ip == board.ip)?;
        Some(self.boards.remove(index))
    }

    pub fn get_by_id(&self, id: i32) -> Option<&Board> {
        self.boards.iter().find(|b| b.id == id)
    }

    pub fn get_by_ip(&self, ip: &str) -> Option<&Board> {
        self.boards.iter().find(|b| b.ip == ip)
    }

    pub fn boards(&self) -> &[Board] {
        &self.boards
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }
}

/// Keep the first board of each IP, preserving scan order
fn dedup_by_ip(scan: Vec<Board>) -> Vec<Board> {
    let mut unique: Vec<Board> = Vec::with_capacity(scan.len());
    for board in scan {
        if unique.iter().any(|b| b.ip == board.ip) {
            tracing::debug!("Ignoring duplicate board {} in scan", board.ip);
            continue;
        }
        unique.push(board);
    }
    unique
}
