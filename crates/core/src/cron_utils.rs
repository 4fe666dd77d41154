use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::{MeasurementError, Result};

/// 默认的CRON表达式：每分钟执行一次
pub const DEFAULT_CRON_EXPRESSION: &str = "* * * * *";

/// 标准5字段CRON表达式（分 时 日 月 周）
///
/// 内部转换为 `cron` crate 使用的6字段格式（秒在最前，星期为 1-7 且周日为1）。
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// 解析5字段CRON表达式
    pub fn parse(cron_expr: &str) -> Result<Self> {
        let expression = cron_expr.trim().to_string();
        let normalized = normalize(&expression)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(&expression, e))?;

        Ok(Self {
            expression,
            schedule,
        })
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> Result<()> {
        Self::parse(cron_expr).map(|_| ())
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 获取下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }
}

fn invalid(expr: &str, message: impl ToString) -> MeasurementError {
    MeasurementError::InvalidCron {
        expr: expr.to_string(),
        message: message.to_string(),
    }
}

/// 将5字段表达式转换为 `cron` crate 的6字段表达式
pub fn normalize(cron_expr: &str) -> Result<String> {
    let fields: Vec<&str> = cron_expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid(
            cron_expr,
            format!("需要5个字段（分 时 日 月 周），实际为 {} 个", fields.len()),
        ));
    }

    let day_of_week = normalize_day_of_week(cron_expr, fields[4])?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], day_of_week
    ))
}

/// 标准CRON中星期为 0-7（0和7均为周日），`cron` crate 为 1-7（1为周日）
fn normalize_day_of_week(cron_expr: &str, field: &str) -> Result<String> {
    let mut days = BTreeSet::new();
    let mut passthrough = Vec::new();

    for element in field.split(',') {
        if element.is_empty() {
            return Err(invalid(cron_expr, "星期字段包含空元素"));
        }
        // 通配符与星期名称两种写法在两种格式中含义相同
        if element.starts_with('*')
            || element.starts_with('?')
            || element.chars().any(|c| c.is_ascii_alphabetic())
        {
            passthrough.push(element.to_string());
            continue;
        }

        let (range, step) = match element.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(cron_expr, format!("无效的步长: {element}")))?;
                if step == 0 {
                    return Err(invalid(cron_expr, "步长必须大于0"));
                }
                (range, step)
            }
            None => (element, 1),
        };

        let (start, end) = match range.split_once('-') {
            Some((start, end)) => (parse_day(cron_expr, start)?, parse_day(cron_expr, end)?),
            None if step > 1 => (parse_day(cron_expr, range)?, 6),
            None => {
                let day = parse_day(cron_expr, range)?;
                (day, day)
            }
        };
        if start > end {
            return Err(invalid(cron_expr, format!("无效的星期范围: {element}")));
        }

        for day in (start..=end).step_by(step as usize) {
            days.insert(day % 7 + 1);
        }
    }

    let mut parts: Vec<String> = days.into_iter().map(|d| d.to_string()).collect();
    parts.extend(passthrough);
    Ok(parts.join(","))
}

fn parse_day(cron_expr: &str, value: &str) -> Result<u32> {
    let day: u32 = value
        .parse()
        .map_err(|_| invalid(cron_expr, format!("无效的星期值: {value}")))?;
    if day > 7 {
        return Err(invalid(cron_expr, format!("星期值超出范围 0-7: {day}")));
    }
    Ok(day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn test_default_expression_fires_every_minute() {
        let schedule = CronSchedule::parse(DEFAULT_CRON_EXPRESSION).unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 30).unwrap();
        let times = schedule.upcoming_times(from, 2);
        assert_eq!(times[0], Utc.with_ymd_and_hms(2024, 1, 1, 10, 1, 0).unwrap());
        assert_eq!(times[1], Utc.with_ymd_and_hms(2024, 1, 1, 10, 2, 0).unwrap());
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        assert!(CronSchedule::parse("0 * * * * *").is_err());
        assert!(CronSchedule::parse("* * * *").is_err());
        assert!(CronSchedule::parse("").is_err());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(CronSchedule::parse("61 * * * *").is_err());
        assert!(CronSchedule::parse("* * * * 8").is_err());
        assert!(CronSchedule::parse("* * * * 1/0").is_err());
    }

    #[test]
    fn test_day_of_week_mapping() {
        assert_eq!(normalize("0 9 * * 1-5").unwrap(), "0 0 9 * * 2,3,4,5,6");
        assert_eq!(normalize("0 9 * * 0").unwrap(), "0 0 9 * * 1");
        assert_eq!(normalize("0 9 * * 7").unwrap(), "0 0 9 * * 1");
        assert_eq!(normalize("0 9 * * 5-7").unwrap(), "0 0 9 * * 1,6,7");
        assert_eq!(normalize("0 9 * * MON-FRI").unwrap(), "0 0 9 * * MON-FRI");
        assert_eq!(normalize("*/5 * * * *").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn test_sunday_schedule_lands_on_sunday() {
        let schedule = CronSchedule::parse("30 8 * * 0").unwrap();
        // 2024-01-01 是周一
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = schedule.next_execution_time(from).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!(next.hour(), 8);
        assert_eq!(next.minute(), 30);
    }
}
