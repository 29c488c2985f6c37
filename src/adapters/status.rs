//! Projection of remote Chart status onto App status

use chrono::{DateTime, Utc};

use crate::crd::{App, AppStatus, AppStatusRelease, Chart};

/// The App status fields mirrored from a Chart, and the only ones compared
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusMirror {
    pub app_version: String,
    pub version: String,
    pub release_status: String,
    pub release_reason: String,
    pub last_deployed: Option<DateTime<Utc>>,
}

impl StatusMirror {
    /// Project a Chart's status. `None` until chart-operator has written one.
    ///
    /// The release reason is the Chart's top-level reason when set, which is
    /// where chart-operator reports failures it hit before Helm ran.
    pub fn from_chart(chart: &Chart) -> Option<Self> {
        let status = chart.status.as_ref()?;
        let release_reason = if status.reason.is_empty() {
            status.release.reason.clone()
        } else {
            status.reason.clone()
        };
        Some(Self {
            app_version: status.app_version.clone(),
            version: status.version.clone(),
            release_status: status.release.status.clone(),
            release_reason,
            last_deployed: status.release.last_deployed,
        })
    }

    /// The mirrored fields as currently recorded on an App
    pub fn from_app(app: &App) -> Self {
        let status = app.status.clone().unwrap_or_default();
        Self {
            app_version: status.app_version,
            version: status.version,
            release_status: status.release.status,
            release_reason: status.release.reason,
            last_deployed: status.release.last_deployed,
        }
    }

    pub fn differs_from(&self, app: &App) -> bool {
        *self != Self::from_app(app)
    }

    /// Copy every mirrored field onto the App's status
    pub fn apply(&self, app: &mut App) {
        self.write_into(app.status.get_or_insert_with(AppStatus::default));
    }

    pub fn write_into(&self, status: &mut AppStatus) {
        status.app_version = self.app_version.clone();
        status.version = self.version.clone();
        status.release = AppStatusRelease {
            status: self.release_status.clone(),
            reason: self.release_reason.clone(),
            last_deployed: self.last_deployed,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AppSpec, ChartSpec, ChartStatus, ChartStatusRelease};
    use chrono::TimeZone;

    fn chart(status: Option<ChartStatus>) -> Chart {
        let mut chart = Chart::new("hello-world", ChartSpec::default());
        chart.status = status;
        chart
    }

    #[test]
    fn chart_without_status_projects_nothing() {
        assert_eq!(StatusMirror::from_chart(&chart(None)), None);
    }

    #[test]
    fn top_level_reason_wins() {
        let mirror = StatusMirror::from_chart(&chart(Some(ChartStatus {
            reason: "tarball not found".to_string(),
            release: ChartStatusRelease {
                status: "FAILED".to_string(),
                reason: "helm error".to_string(),
                last_deployed: None,
            },
            ..Default::default()
        })))
        .unwrap();
        assert_eq!(mirror.release_reason, "tarball not found");

        let mirror = StatusMirror::from_chart(&chart(Some(ChartStatus {
            release: ChartStatusRelease {
                reason: "helm error".to_string(),
                ..Default::default()
            },
            ..Default::default()
        })))
        .unwrap();
        assert_eq!(mirror.release_reason, "helm error");
    }

    #[test]
    fn apply_then_compare_is_stable() {
        let deployed = Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap();
        let mirror = StatusMirror {
            app_version: "0.4.0".to_string(),
            version: "1.2.3".to_string(),
            release_status: "DEPLOYED".to_string(),
            release_reason: String::new(),
            last_deployed: Some(deployed),
        };
        let mut app = App::new("hello", AppSpec::default());
        assert!(mirror.differs_from(&app));

        mirror.apply(&mut app);
        assert!(!mirror.differs_from(&app));
        assert_eq!(app.status.unwrap().release.last_deployed, Some(deployed));
    }
}
