//! Page-level flows on the MTR portal: login, export download and the
//! manifest-tracking screen. Selectors for every screen the robot touches
//! live in [`selectors`].

use chrono::{Days, Months, NaiveDate, Utc};
use chrono_tz::America::Sao_Paulo;
use mtr_portal::{xpath_literal, PortalDriver, PortalError, TAB_KEY};
use tracing::{info, instrument};

use crate::config::PortalConfig;
use crate::error::{Result, RobotError};

pub mod selectors {
    pub const LOGIN_CNPJ: &str = "#txtCnpj";
    pub const LOGIN_CPF: &str = "#txtCpfUsuario";
    pub const LOGIN_PASSWORD: &str = "#txtSenha";
    pub const LOGIN_SUBMIT: &str = "#btEntrar";

    pub const RECEIVE_CODE: &str = "#txtCodigoMtrRecebimento";
    pub const RECEIVE_BUTTON: &str = "#btnReceberMtr";
    pub const RECEIVE_DIALOG: &str = "#divRecebimento";
    pub const RECEIVE_DIALOG_CLOSE: &str = "(//div[@id='divRecebimento'])[last()]/../div[contains(@class,'ui-dialog-titlebar')]//button[@title='close']";

    pub const DATE_PICKER: &str =
        "#formRespRecebimento > table:nth-child(5) > tbody > tr:nth-child(2) > td:nth-child(2) > img";
    pub const CALENDAR_MONTH: &str = "#ui-datepicker-div > div > div > span.ui-datepicker-month";
    pub const CALENDAR_YEAR: &str = "#ui-datepicker-div > div > div > span.ui-datepicker-year";
    pub const CALENDAR_PREV: &str = "#ui-datepicker-div > div > a.ui-datepicker-prev.ui-corner-all > span";
    pub const CALENDAR_NEXT: &str = "#ui-datepicker-div > div > a.ui-datepicker-next.ui-corner-all > span";
    pub const CALENDAR_TABLE: &str = "table.ui-datepicker-calendar";

    pub const RECEIVER_TABLE: &str = "#pesquisaResponsavelRecebimento";

    pub const ROW_WEIGHT_TEXT: &str = "#tbRecebeMTR tbody tr:first-child td:nth-child(4)";
    pub const ROW_WEIGHT_INPUT: &str = "#tbRecebeMTR tbody tr:first-child td:nth-child(5) input";
    pub const ROW_JUSTIFY_ICON: &str = "#tbRecebeMTR tbody tr:first-child td:nth-child(6) img";
    pub const ROW_RESIDUE_EDITOR: &str = "#tbRecebeMTR tbody tr:first-child td:nth-child(7) input";

    pub const JUSTIFICATION_TEXT: &str = "#txtJust";
    pub const JUSTIFICATION_SAVE: &str = "//div[contains(@class,'ui-dialog')][.//*[@id='txtJust']]//div[contains(@class,'ui-dialog-buttonpane')]//button[contains(normalize-space(.),'Salvar')]";

    pub const RESIDUE_LINK: &str = "#linkResiduo";
    pub const RESIDUE_CODE: &str = "#txtTipoResiduo";
    pub const RESIDUE_QUANTITY: &str = "#txtQuantidade";
    pub const RESIDUE_UNIT: &str = "#cmbUnidade";
    pub const RESIDUE_STATE: &str = "#cmbEstadoFisico";
    pub const RESIDUE_CLASS: &str = "#cmbClasse";
    pub const RESIDUE_PACKAGING: &str = "#cmbAcondicionamento";
    pub const RESIDUE_TECHNOLOGY: &str = "#cmbTecnologia";
    pub const RESIDUE_CONFIRM: &str = "body > div:nth-child(12) > div.ui-dialog-buttonpane.ui-widget-content.ui-helper-clearfix > div > button:nth-child(1)";
    pub const RESIDUE_SUCCESS_CLOSE: &str = "//div[contains(@class,'ui-dialog')][contains(., 'Resíduo Cadastrado Com Sucesso!')]//button[@title='close']";

    pub const MESSAGE_CLOSE: &str = "//div[contains(@class,'ui-dialog')][.//*[@id='msg']]//button[contains(@class,'ui-dialog-titlebar-close')]";
}

/// Calendar link for a day of the displayed month.
pub fn calendar_day(day: u32) -> String {
    format!("//table[contains(@class,'ui-datepicker-calendar')]//a[normalize-space(.)='{day}']")
}

/// First receiver-search cell containing `name`.
pub fn receiver_cell(name: &str) -> String {
    format!(
        "(//*[@id='pesquisaResponsavelRecebimento']//td[contains(., {})])[1]",
        xpath_literal(name)
    )
}

pub fn main_page_url(portal: &PortalConfig) -> String {
    format!("{}ControllerServlet?acao=paginaPrincipal", portal.base_url)
}

pub fn tracking_url(portal: &PortalConfig) -> String {
    format!("{}ControllerServlet?acao=acompanhamentoManifesto", portal.base_url)
}

/// Calendar date at the portal's location.
pub fn sao_paulo_today() -> NaiveDate {
    Utc::now().with_timezone(&Sao_Paulo).date_naive()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Three months back up to yesterday.
pub fn export_range(today: NaiveDate) -> ExportRange {
    ExportRange {
        start: today.checked_sub_months(Months::new(3)).unwrap_or(today),
        end: today.checked_sub_days(Days::new(1)).unwrap_or(today),
    }
}

pub fn export_url(portal: &PortalConfig, range: ExportRange) -> String {
    format!(
        "{base}ControllerServlet?acao=relatorio\
         &nomeRelatorio=rel_mtr_ger_trans_des\
         &condicao=pageRelatorio\
         &txtDataInicial_Mtr={start}\
         &txtDataFinal_Mtr={end}\
         &destinador_codigo={receiver}\
         &gerador_codigo=0\
         &transportador_codigo=0",
        base = portal.base_url,
        start = range.start.format("%d/%m/%Y"),
        end = range.end.format("%d/%m/%Y"),
        receiver = portal.receiver_code,
    )
}

/// Logs in with the configured credentials. Any failure is fatal for the run.
#[instrument(skip_all, fields(base_url = %portal.base_url))]
pub async fn login<D>(driver: &mut D, portal: &PortalConfig) -> Result<()>
where
    D: PortalDriver + ?Sized,
{
    submit_login(driver, portal)
        .await
        .map_err(|err| RobotError::Login(err.to_string()))?;
    info!("logged in to the MTR portal");
    Ok(())
}

async fn submit_login<D>(driver: &mut D, portal: &PortalConfig) -> std::result::Result<(), PortalError>
where
    D: PortalDriver + ?Sized,
{
    driver.goto(&portal.base_url).await?;
    driver.fill(selectors::LOGIN_CNPJ, &portal.login_cnpj).await?;
    driver.send_keys(selectors::LOGIN_CNPJ, TAB_KEY).await?;
    driver.fill(selectors::LOGIN_CPF, &portal.login_cpf).await?;
    driver.fill(selectors::LOGIN_PASSWORD, &portal.password).await?;
    driver.click(selectors::LOGIN_SUBMIT).await?;
    driver.wait_for_url(&main_page_url(portal)).await
}

/// Downloads the "manifests by receiver" export for the default range.
pub async fn fetch_manifest_export<D>(
    driver: &mut D,
    portal: &PortalConfig,
    today: NaiveDate,
) -> Result<Vec<u8>>
where
    D: PortalDriver + ?Sized,
{
    let range = export_range(today);
    let url = export_url(portal, range);
    info!(start = %range.start, end = %range.end, "downloading manifest export");
    let bytes = driver.download(&url).await?;
    info!(bytes = bytes.len(), "manifest export downloaded");
    Ok(bytes)
}

/// Opens the manifest-tracking screen unless the browser is already on it.
pub async fn go_to_tracking<D>(driver: &mut D, portal: &PortalConfig) -> std::result::Result<(), PortalError>
where
    D: PortalDriver + ?Sized,
{
    let url = tracking_url(portal);
    open_url(driver, &url).await
}

pub(crate) async fn open_url<D>(driver: &mut D, url: &str) -> std::result::Result<(), PortalError>
where
    D: PortalDriver + ?Sized,
{
    if driver.current_url().await? != url {
        driver.goto(url).await?;
    }
    driver.wait_for_url(url).await
}
