//! Library presence tracking
//!
//! Per student: `Absent --check_in--> Present --check_out--> Absent`.
//! Check-in while present and check-out while absent are errors.

use chrono::Utc;

use crate::{
    error::{AppError, AppResult},
    models::{PresenceSession, PresenceStatus, StudentId},
    repository::{CirculationTx, Repository},
};

#[derive(Clone)]
pub struct PresenceTracker {
    repository: Repository,
}

impl PresenceTracker {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Open a session for a student who is not inside yet
    pub async fn check_in(&self, student_id: StudentId) -> AppResult<PresenceSession> {
        let mut tx = self.repository.begin().await?;
        lock_student(tx.as_mut(), student_id).await?;

        if self.open_session(tx.as_mut(), student_id).await?.is_some() {
            return Err(AppError::AlreadyPresent(student_id));
        }

        let session = tx.insert_session(student_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(session)
    }

    /// Close the open session of a student
    pub async fn check_out(&self, student_id: StudentId) -> AppResult<PresenceSession> {
        let mut tx = self.repository.begin().await?;
        lock_student(tx.as_mut(), student_id).await?;

        let open = self
            .open_session(tx.as_mut(), student_id)
            .await?
            .ok_or(AppError::NotPresent(student_id))?;

        // Clamp against clock skew so the session never ends before it starts
        let check_out = Utc::now().max(open.check_in);
        let session = tx.close_session(student_id, open.id, check_out).await?;
        tx.commit().await?;
        Ok(session)
    }

    /// Whether the student currently has an open session
    pub async fn is_present(&self, student_id: StudentId) -> AppResult<bool> {
        let mut tx = self.repository.begin().await?;
        Ok(self.open_session(tx.as_mut(), student_id).await?.is_some())
    }

    /// Presence flag plus the open session
    pub async fn status(&self, student_id: StudentId) -> AppResult<PresenceStatus> {
        let mut tx = self.repository.begin().await?;
        lock_student(tx.as_mut(), student_id).await?;
        let session = self.open_session(tx.as_mut(), student_id).await?;
        Ok(PresenceStatus {
            present: session.is_some(),
            session,
        })
    }

    /// Visit history, newest first
    pub async fn sessions(&self, student_id: StudentId) -> AppResult<Vec<PresenceSession>> {
        let mut tx = self.repository.begin().await?;
        lock_student(tx.as_mut(), student_id).await?;
        tx.sessions(student_id).await
    }

    /// Open session of the student, if any.
    ///
    /// Two open sessions can only come from a broken locking discipline.
    pub(crate) async fn open_session(
        &self,
        tx: &mut dyn CirculationTx,
        student_id: StudentId,
    ) -> AppResult<Option<PresenceSession>> {
        let mut open = tx.open_sessions(student_id).await?;
        if open.len() > 1 {
            return Err(AppError::Invariant(format!(
                "student {} has {} open sessions",
                student_id,
                open.len()
            )));
        }
        Ok(open.pop())
    }

    /// Fail with `NotPresent` unless the student is inside the library
    pub(crate) async fn require_present(
        &self,
        tx: &mut dyn CirculationTx,
        student_id: StudentId,
    ) -> AppResult<PresenceSession> {
        self.open_session(tx, student_id)
            .await?
            .ok_or(AppError::NotPresent(student_id))
    }
}

/// Lock a student row, mapping absence to `StudentNotFound`
pub(crate) async fn lock_student(
    tx: &mut dyn CirculationTx,
    student_id: StudentId,
) -> AppResult<()> {
    tx.lock_student(student_id)
        .await?
        .map(|_| ())
        .ok_or(AppError::StudentNotFound(student_id))
}
